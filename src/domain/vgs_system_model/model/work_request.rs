use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::utils::id::{ClientId, GsId, RmId};

/// Who currently carries monitoring or execution responsibility for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Client(ClientId),
    GridScheduler(GsId),
    ResourceManager(RmId),
}

/// A job plus the id of its current owner.
///
/// Equality and hashing only look at the job id, so a set of work requests holds
/// at most one entry per job no matter how often it was rescheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkRequest {
    pub job: Job,
    pub source: Source,
}

impl WorkRequest {
    pub fn new(job: Job, source: Source) -> Self {
        WorkRequest { job, source }
    }
}

impl PartialEq for WorkRequest {
    fn eq(&self, other: &Self) -> bool {
        self.job.job_id == other.job.job_id
    }
}

impl Eq for WorkRequest {}

impl Hash for WorkRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.job.job_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vgs_system_model::utils::id::JobId;
    use std::collections::HashSet;

    #[test]
    fn equality_follows_the_job_id() {
        let job = Job::new(JobId::new(1), 10);
        let first = WorkRequest::new(job, Source::Client(ClientId::new(0)));
        let moved = WorkRequest::new(job.assigned_to(RmId::new(3)), Source::GridScheduler(GsId::new(1)));

        assert_eq!(first, moved);

        let mut set = HashSet::new();
        set.insert(first);
        assert!(!set.insert(moved));
        assert_eq!(set.len(), 1);
    }
}
