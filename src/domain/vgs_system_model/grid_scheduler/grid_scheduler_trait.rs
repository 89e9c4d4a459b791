use async_trait::async_trait;

use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{BackUpRequest, MonitoringRequest, PromotionRequest};
use crate::domain::vgs_system_model::utils::id::{GsId, RmId};
use crate::error::Result;

/// The peer-facing surface of a grid scheduler.
///
/// Every call fails with [`crate::error::Error::InstanceOffline`] while the scheduler is stopped,
/// except `start`.
#[async_trait]
pub trait GridSchedulerApi: Addressable {
    /// Become the primary watcher of a job running on `request.source_id`.
    async fn monitor(&self, request: MonitoringRequest) -> Result<()>;

    /// Keep a failover copy of a job the peer GS `request.source_id` is primary for.
    async fn back_up(&self, request: BackUpRequest) -> Result<()>;

    /// Take over primary responsibility for a job backed up for `request.source_id`.
    async fn promote(&self, request: PromotionRequest) -> Result<()>;

    /// Place a job on some RM other than the one it is currently attributed to.
    /// Returns the chosen RM, or `NoCapacityAvailable` if none could be reached.
    async fn off_load(&self, job: Job) -> Result<RmId>;

    /// A job finished on `request.source_id`. Returns whether an entry was removed.
    async fn release_monitored(&self, request: MonitoringRequest) -> Result<bool>;

    async fn release_back_up(&self, request: BackUpRequest) -> Result<bool>;

    async fn receive_resource_manager_wake_up_announcement(&self, from: RmId) -> Result<()>;

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()>;

    async fn get_id(&self) -> Result<GsId>;

    async fn start(&self) -> Result<()>;

    async fn shut_down(&self) -> Result<()>;
}
