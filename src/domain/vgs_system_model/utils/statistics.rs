use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::sync::{OnceLock, mpsc};
use std::thread;
use std::time::Instant;

use crate::error::Result;

/// Each event is a set of key-value pairs. Every key is one column of the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatParameter {
    /// Milliseconds since the collector was started.
    Time,

    /// "GS", "RM" or "CLIENT"
    Component,

    ComponentName,

    JobId,

    /// What happened, e.g. "Dispatch" or "Reschedule"
    Command,

    /// Job duration in time units
    Duration,

    /// Load of the component after the event
    Load,
}

impl StatParameter {
    pub const ALL: [StatParameter; 7] = [
        StatParameter::Time,
        StatParameter::Component,
        StatParameter::ComponentName,
        StatParameter::JobId,
        StatParameter::Command,
        StatParameter::Duration,
        StatParameter::Load,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            StatParameter::Time => "Time",
            StatParameter::Component => "Component",
            StatParameter::ComponentName => "ComponentName",
            StatParameter::JobId => "JobId",
            StatParameter::Command => "Command",
            StatParameter::Duration => "Duration",
            StatParameter::Load => "Load",
        }
    }

    pub fn headers() -> Vec<&'static str> {
        Self::ALL.iter().map(|param| param.header()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Text(String),
}

impl StatValue {
    fn render(&self) -> String {
        match self {
            StatValue::Integer(i) => i.to_string(),
            StatValue::Text(t) => t.clone(),
        }
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Integer(v)
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for StatValue {
    fn from(v: u32) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticEvent {
    data: HashMap<StatParameter, StatValue>,
}

impl StatisticEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Into<StatValue>>(mut self, param: StatParameter, value: V) -> Self {
        self.data.insert(param, value.into());
        self
    }

    pub fn get(&self, param: StatParameter) -> Option<&StatValue> {
        self.data.get(&param)
    }

    /// One CSV row in header order. Missing values are written as "NA".
    pub fn to_row(&self) -> Vec<String> {
        StatParameter::ALL.iter().map(|param| self.data.get(param).map(StatValue::render).unwrap_or_else(|| "NA".to_string())).collect()
    }
}

enum StatsMessage {
    Log(StatisticEvent),
    Flush,
    Shutdown,
}

/// Handle to the background writer thread. Cheap to call from any task.
pub struct StatsCollector {
    sender: mpsc::Sender<StatsMessage>,
    started: Instant,
}

impl StatsCollector {
    /// Opens the output (stdout when `filename` is `None`) and spawns the writer thread.
    pub fn init(filename: Option<String>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match filename {
            Some(f) => Box::new(File::create(f)?),
            None => Box::new(io::stdout()),
        };

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || Self::worker_loop(rx, writer));

        Ok(StatsCollector { sender: tx, started: Instant::now() })
    }

    fn worker_loop(rx: mpsc::Receiver<StatsMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        if let Err(e) = csv_wtr.write_record(StatParameter::headers()) {
            log::error!("Stats Error: Failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                StatsMessage::Log(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Stats Error: Failed to write record: {}", e);
                    }
                }
                StatsMessage::Flush => {
                    let _ = csv_wtr.flush();
                }
                StatsMessage::Shutdown => {
                    let _ = csv_wtr.flush();
                    break;
                }
            }
        }
    }

    /// Non-blocking. Stamps the event with the elapsed time unless it carries one.
    pub fn add_event(&self, mut event: StatisticEvent) {
        if event.get(StatParameter::Time).is_none() {
            let elapsed = self.started.elapsed().as_millis() as u64;
            event = event.set(StatParameter::Time, elapsed);
        }

        let _ = self.sender.send(StatsMessage::Log(event));
    }

    pub fn flush(&self) {
        let _ = self.sender.send(StatsMessage::Flush);
    }

    pub fn shut_down(&self) {
        let _ = self.sender.send(StatsMessage::Shutdown);
    }
}

static GLOBAL_STATS: OnceLock<StatsCollector> = OnceLock::new();

/// Initializes the process-wide collector. Later calls keep the first collector.
pub fn init_global(filename: Option<String>) -> Result<()> {
    let collector = StatsCollector::init(filename)?;
    let _ = GLOBAL_STATS.set(collector);
    Ok(())
}

/// Logs to the global collector. Dropped silently when none was initialized.
pub fn add_global_event(event: StatisticEvent) {
    if let Some(collector) = GLOBAL_STATS.get() {
        collector.add_event(event);
    }
}

pub fn flush_global() {
    if let Some(collector) = GLOBAL_STATS.get() {
        collector.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_header_order() {
        let event = StatisticEvent::new()
            .set(StatParameter::Component, "RM")
            .set(StatParameter::ComponentName, "RM 2")
            .set(StatParameter::JobId, 7u32)
            .set(StatParameter::Command, "Dispatch")
            .set(StatParameter::Load, 15u64);

        assert_eq!(StatParameter::headers(), vec!["Time", "Component", "ComponentName", "JobId", "Command", "Duration", "Load"]);
        assert_eq!(event.to_row(), vec!["NA", "RM", "RM 2", "7", "Dispatch", "NA", "15"]);
    }

    #[test]
    fn writes_semicolon_separated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");

        let collector = StatsCollector::init(Some(path.to_string_lossy().into_owned())).unwrap();
        collector.add_event(StatisticEvent::new().set(StatParameter::Command, "Finish").set(StatParameter::Time, 3u64));
        collector.shut_down();

        let mut content = String::new();
        for _ in 0..100 {
            content = std::fs::read_to_string(&path).unwrap_or_default();
            if content.lines().count() >= 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Time;Component;ComponentName;JobId;Command;Duration;Load");
        assert_eq!(lines[1], "3;NA;NA;NA;Finish;NA;NA");
    }
}
