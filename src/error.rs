use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Peer at '{address}' could not be reached")]
    PeerUnreachable { address: String },

    #[error("No registry entry for id {0}")]
    NoEntryForId(u32),

    #[error("{0} is offline")]
    InstanceOffline(String),

    #[error("No reachable candidate available: {0}")]
    NoCapacityAvailable(String),

    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Malformed peer table: {0}")]
    MalformedPeerTable(String),

    #[error("Failed to encode or decode a frame: {0}")]
    CodecError(String),

    #[error("Peer rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn unreachable(address: impl Into<String>) -> Self {
        Error::PeerUnreachable { address: address.into() }
    }

    /// True for failures that only say something about the remote peer's liveness.
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, Error::PeerUnreachable { .. } | Error::InstanceOffline(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
