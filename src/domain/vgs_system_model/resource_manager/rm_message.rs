use tokio::sync::oneshot;

use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{Heartbeat, WorkOrder};
use crate::domain::vgs_system_model::resource_manager::eager_resource_manager::RmSnapshot;
use crate::domain::vgs_system_model::utils::id::{GsId, NodeId, RmId};
use crate::error::Result;

/// Every call the RM handle forwards to the task owning the RM state.
pub enum RmMessage {
    OrderWork {
        order: WorkOrder,
        reply_to: oneshot::Sender<Result<()>>,
    },

    Queue {
        job: Job,
        reply_to: oneshot::Sender<Result<Option<Job>>>,
    },

    /// A GS agreed to monitor a job that arrived through `queue`.
    SetMonitor {
        job: Job,
        gs_id: GsId,
    },

    /// `generation` is set by node timers and absent for external callers.
    Finish {
        node_id: NodeId,
        job: Job,
        generation: Option<u64>,
        reply_to: Option<oneshot::Sender<bool>>,
    },

    Ping(oneshot::Sender<Result<Heartbeat>>),

    WakeUp {
        from: GsId,
        reply_to: oneshot::Sender<Result<()>>,
    },

    GetId(oneshot::Sender<Result<RmId>>),

    Snapshot(oneshot::Sender<RmSnapshot>),

    /// Resets state; the RM stays closed for work until `Resume`.
    Start(oneshot::Sender<()>),

    Resume(oneshot::Sender<()>),

    ShutDown(oneshot::Sender<()>),
}
