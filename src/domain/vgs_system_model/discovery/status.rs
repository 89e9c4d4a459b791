use serde::{Deserialize, Serialize};
use std::fmt;

/// Last-known liveness of a registered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Returned for ids the table does not cover.
    Unknown,
    Online,
    Offline,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unknown => write!(f, "UNKNOWN"),
            Status::Online => write!(f, "ONLINE"),
            Status::Offline => write!(f, "OFFLINE"),
        }
    }
}
