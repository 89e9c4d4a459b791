use std::collections::{HashMap, HashSet};

use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::work_request::WorkRequest;
use crate::domain::vgs_system_model::utils::id::{GsId, JobId, RmId};

/// The bookkeeping a GS guards with its instance lock.
#[derive(Debug, Default)]
pub(crate) struct GsState {
    /// Jobs this GS is primary for, keyed by the RM executing them.
    monitored: HashMap<RmId, HashSet<WorkRequest>>,

    /// Failover copies, keyed by the peer GS that is primary for them.
    backed_up: HashMap<GsId, HashSet<WorkRequest>>,

    /// Which peer holds the backup of each monitored job.
    backup_holders: HashMap<JobId, GsId>,
}

impl GsState {
    pub fn clear(&mut self) {
        self.monitored.clear();
        self.backed_up.clear();
        self.backup_holders.clear();
    }

    /// Files the request under `rm_id`, replacing an older copy of the same job.
    pub fn file_monitored(&mut self, rm_id: RmId, work_request: WorkRequest) -> bool {
        self.monitored.entry(rm_id).or_default().replace(work_request).is_none()
    }

    pub fn unfile_monitored(&mut self, rm_id: RmId, job_id: JobId) -> Option<WorkRequest> {
        let set = self.monitored.get_mut(&rm_id)?;
        let removed = set.iter().find(|work_request| work_request.job.job_id == job_id).copied();

        if let Some(work_request) = removed {
            set.remove(&work_request);
            if set.is_empty() {
                self.monitored.remove(&rm_id);
            }
        }

        removed
    }

    /// The RM a job is filed under, if this GS monitors it at all.
    pub fn monitored_under(&self, job_id: JobId) -> Option<RmId> {
        self.monitored.iter().find(|(_, set)| set.iter().any(|work_request| work_request.job.job_id == job_id)).map(|(rm_id, _)| *rm_id)
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.values().map(HashSet::len).sum()
    }

    pub fn monitored_jobs(&self, rm_id: RmId) -> Vec<Job> {
        sorted_jobs(self.monitored.get(&rm_id))
    }

    pub fn file_backup(&mut self, gs_id: GsId, work_request: WorkRequest) -> bool {
        self.backed_up.entry(gs_id).or_default().replace(work_request).is_none()
    }

    pub fn release_backup(&mut self, gs_id: GsId, job_id: JobId) -> bool {
        let Some(set) = self.backed_up.get_mut(&gs_id) else {
            return false;
        };

        let before = set.len();
        set.retain(|work_request| work_request.job.job_id != job_id);
        let removed = set.len() < before;

        if set.is_empty() {
            self.backed_up.remove(&gs_id);
        }
        removed
    }

    pub fn take_backed_up(&mut self, gs_id: GsId) -> Vec<WorkRequest> {
        self.backed_up.remove(&gs_id).map(|set| set.into_iter().collect()).unwrap_or_default()
    }

    /// Takes only the listed jobs out of the backup set of `gs_id`.
    pub fn take_backed_up_jobs(&mut self, gs_id: GsId, job_ids: &[JobId]) -> Vec<WorkRequest> {
        let Some(set) = self.backed_up.get_mut(&gs_id) else {
            return Vec::new();
        };

        let taken: Vec<WorkRequest> = set.iter().filter(|work_request| job_ids.contains(&work_request.job.job_id)).copied().collect();
        for work_request in &taken {
            set.remove(work_request);
        }

        if set.is_empty() {
            self.backed_up.remove(&gs_id);
        }
        taken
    }

    pub fn backed_up_jobs(&self, gs_id: GsId) -> Vec<Job> {
        sorted_jobs(self.backed_up.get(&gs_id))
    }

    pub fn set_backup_holder(&mut self, job_id: JobId, gs_id: GsId) {
        self.backup_holders.insert(job_id, gs_id);
    }

    pub fn backup_holder(&self, job_id: JobId) -> Option<GsId> {
        self.backup_holders.get(&job_id).copied()
    }

    pub fn take_backup_holder(&mut self, job_id: JobId) -> Option<GsId> {
        self.backup_holders.remove(&job_id)
    }
}

fn sorted_jobs(set: Option<&HashSet<WorkRequest>>) -> Vec<Job> {
    let mut jobs: Vec<Job> = set.map(|set| set.iter().map(|work_request| work_request.job).collect()).unwrap_or_default();
    jobs.sort_by_key(|job| job.job_id);
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vgs_system_model::model::work_request::Source;

    fn request(job_id: u32, rm_id: u32) -> WorkRequest {
        let job = Job::new(JobId::new(job_id), 10).assigned_to(RmId::new(rm_id));
        WorkRequest::new(job, Source::ResourceManager(RmId::new(rm_id)))
    }

    #[test]
    fn filing_is_idempotent_and_keeps_the_latest_copy() {
        let mut state = GsState::default();

        assert!(state.file_monitored(RmId::new(1), request(7, 2)));
        assert!(!state.file_monitored(RmId::new(1), request(7, 1)));

        assert_eq!(state.monitored_count(), 1);
        assert_eq!(state.monitored_jobs(RmId::new(1))[0].current_resource_manager_id, Some(RmId::new(1)));
        assert_eq!(state.monitored_under(JobId::new(7)), Some(RmId::new(1)));
    }

    #[test]
    fn unfiling_only_touches_the_given_manager() {
        let mut state = GsState::default();
        state.file_monitored(RmId::new(1), request(7, 1));

        assert!(state.unfile_monitored(RmId::new(2), JobId::new(7)).is_none());
        assert!(state.unfile_monitored(RmId::new(1), JobId::new(7)).is_some());
        assert_eq!(state.monitored_count(), 0);
        assert!(state.monitored_jobs(RmId::new(1)).is_empty());
    }

    #[test]
    fn backups_are_keyed_by_the_primary() {
        let mut state = GsState::default();
        state.file_backup(GsId::new(2), request(3, 0));
        state.file_backup(GsId::new(2), request(4, 0));

        assert!(!state.release_backup(GsId::new(1), JobId::new(3)));
        assert!(state.release_backup(GsId::new(2), JobId::new(3)));

        let taken = state.take_backed_up(GsId::new(2));
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].job.job_id, JobId::new(4));
        assert!(state.backed_up_jobs(GsId::new(2)).is_empty());
    }

    #[test]
    fn selective_take_leaves_newer_backups_alone() {
        let mut state = GsState::default();
        state.file_backup(GsId::new(2), request(3, 0));
        state.file_backup(GsId::new(2), request(4, 0));

        let taken = state.take_backed_up_jobs(GsId::new(2), &[JobId::new(3), JobId::new(9)]);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].job.job_id, JobId::new(3));
        assert_eq!(state.backed_up_jobs(GsId::new(2)).len(), 1);

        assert!(state.take_backed_up_jobs(GsId::new(5), &[JobId::new(4)]).is_empty());
    }
}
