use async_trait::async_trait;

use crate::domain::vgs_system_model::model::requests::Heartbeat;
use crate::error::Result;

/// Anything that can be reached through a registry and answers liveness probes.
#[async_trait]
pub trait Addressable: Send + Sync {
    /// Cheap round trip. Fails when the peer is unreachable or not running; on success the
    /// heartbeat carries the peer's self-reported load.
    async fn ping(&self) -> Result<Heartbeat>;
}
