use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock shared by every component of one deployment.
///
/// Job durations are abstract time units; the simulator decides how long a unit lasts.
pub trait SystemSimulator: std::fmt::Debug + Send + Sync {
    fn get_current_time_in_ms(&self) -> i64;
    fn to_duration(&self, time_units: u64) -> Duration;
}

pub type SharedSimulator = Arc<dyn SystemSimulator>;

#[derive(Debug, Clone)]
pub struct Simulator {
    time_unit: Duration,
    real_time_base_timestamp: i64,
}

impl Simulator {
    pub fn new(time_unit_ms: u64) -> Simulator {
        Simulator { time_unit: Duration::from_millis(time_unit_ms), real_time_base_timestamp: Self::get_system_time_ms() }
    }

    pub fn shared(time_unit_ms: u64) -> SharedSimulator {
        Arc::new(Self::new(time_unit_ms))
    }

    fn get_system_time_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
    }
}

impl SystemSimulator for Simulator {
    /// Milliseconds since the simulator was created.
    fn get_current_time_in_ms(&self) -> i64 {
        Self::get_system_time_ms() - self.real_time_base_timestamp
    }

    fn to_duration(&self, time_units: u64) -> Duration {
        self.time_unit.saturating_mul(time_units.min(u32::MAX as u64) as u32)
    }
}
