use async_trait::async_trait;

use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::WorkOrder;
use crate::domain::vgs_system_model::utils::id::{GsId, NodeId, RmId};
use crate::error::Result;

/// The scheduler- and node-facing surface of a resource manager.
#[async_trait]
pub trait ResourceManagerApi: Addressable {
    /// Execute a job on behalf of the issuing GS.
    async fn order_work(&self, order: WorkOrder) -> Result<()>;

    /// Direct client submission.
    async fn queue(&self, job: Job) -> Result<()>;

    /// Completion callback of a node. Returns `false` if the node was not running that job.
    async fn finish(&self, node_id: NodeId, job: Job) -> Result<bool>;

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()>;

    async fn get_id(&self) -> Result<RmId>;

    async fn start(&self) -> Result<()>;

    async fn shut_down(&self) -> Result<()>;
}
