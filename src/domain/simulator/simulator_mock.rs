use crate::domain::simulator::simulator::SystemSimulator;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Fixed clock with one millisecond per time unit, for tests.
#[derive(Debug, Clone)]
pub struct MockSimulator {
    pub time: Arc<AtomicI64>,
}

impl MockSimulator {
    pub fn new(time: i64) -> MockSimulator {
        MockSimulator { time: Arc::new(AtomicI64::new(time)) }
    }

    pub fn set_current_time(&self, time: i64) {
        self.time.store(time, Ordering::Relaxed);
    }
}

impl SystemSimulator for MockSimulator {
    fn get_current_time_in_ms(&self) -> i64 {
        self.time.load(Ordering::Relaxed)
    }

    fn to_duration(&self, time_units: u64) -> Duration {
        Duration::from_millis(time_units)
    }
}
