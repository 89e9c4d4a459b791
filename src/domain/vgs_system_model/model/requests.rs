use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::vgs_system_model::model::work_request::WorkRequest;
use crate::domain::vgs_system_model::utils::id::{GsId, GsTag, Id, RmTag};

/// Routing metadata shared by the monitoring protocol messages: who sent it and for which job.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Routed<S> {
    pub source_id: Id<S>,
    pub work_request: WorkRequest,
}

impl<S> Routed<S> {
    pub fn new(source_id: Id<S>, work_request: WorkRequest) -> Self {
        Routed { source_id, work_request }
    }
}

impl<S> Clone for Routed<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Routed<S> {}

impl<S> fmt::Debug for Routed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routed").field("source_id", &self.source_id).field("work_request", &self.work_request).finish()
    }
}

/// Sent by an RM: "watch this job, it runs on me". Also used to release the watch.
pub type MonitoringRequest = Routed<RmTag>;

/// Sent by a primary GS to a peer GS that keeps a failover copy.
pub type BackUpRequest = Routed<GsTag>;

/// Turns a backup entry filed under the source GS into a primary entry.
pub type PromotionRequest = Routed<GsTag>;

/// The envelope telling an RM to execute a job on behalf of a GS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkOrder {
    pub issuing_gs_id: GsId,
    pub work_request: WorkRequest,
}

impl WorkOrder {
    pub fn new(issuing_gs_id: GsId, work_request: WorkRequest) -> Self {
        WorkOrder { issuing_gs_id, work_request }
    }
}

/// Answer to a liveness probe. The load doubles as the figure weighted selection consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub load: u64,
}
