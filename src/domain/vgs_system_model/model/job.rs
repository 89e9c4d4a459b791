use serde::{Deserialize, Serialize};

use crate::domain::vgs_system_model::utils::id::{JobId, RmId};

/// A unit of simulated work.
///
/// `duration` is the execution cost in abstract time units. The RM presently responsible
/// for the job is tracked in `current_resource_manager_id` and rewritten on every reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub duration: u64,
    pub current_resource_manager_id: Option<RmId>,
}

impl Job {
    pub fn new(job_id: JobId, duration: u64) -> Self {
        Job { job_id, duration, current_resource_manager_id: None }
    }

    pub fn assigned_to(mut self, rm_id: RmId) -> Self {
        self.current_resource_manager_id = Some(rm_id);
        self
    }
}
