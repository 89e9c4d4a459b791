use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::discovery::pinger::Pinger;
use crate::domain::vgs_system_model::discovery::registry::{GsRegistry, RmRegistry};
use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::domain::vgs_system_model::discovery::status::Status;
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use crate::domain::vgs_system_model::grid_scheduler::state::GsState;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{BackUpRequest, Heartbeat, MonitoringRequest, PromotionRequest, WorkOrder};
use crate::domain::vgs_system_model::model::work_request::{Source, WorkRequest};
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::domain::vgs_system_model::utils::id::{GsId, GsTag, JobId, RmId, RmTag};
use crate::domain::vgs_system_model::utils::statistics::{self, StatParameter, StatisticEvent};
use crate::error::{Error, Result};

/// Peer failures this GS has to recover from.
#[derive(Debug, Clone)]
enum GsEvent {
    ResourceManagerOffline(RmId),
    GridSchedulerOffline(GsId),

    /// The RM came back before a ping saw it fail. The listed jobs belonged to its earlier run.
    ResourceManagerRestarted(RmId, Vec<JobId>),

    /// Same for a peer GS; the listed jobs are backups filed by its earlier run.
    GridSchedulerRestarted(GsId, Vec<JobId>),
}

/// Point-in-time view of a GS's bookkeeping.
#[derive(Debug, Clone)]
pub struct GsSnapshot {
    pub id: GsId,
    pub running: bool,
    pub recovering: bool,
    pub monitored: HashMap<RmId, Vec<Job>>,
    pub backed_up: HashMap<GsId, Vec<Job>>,
}

/// A grid scheduler: places jobs on resource managers, watches them until they finish and
/// replaces them when their RM fails.
///
/// Each monitored job is mirrored to one peer GS, which takes over when this GS goes offline.
/// Registry offline notifications are queued into an event task, so recovery never runs inside
/// a prober.
#[derive(Clone)]
pub struct GridScheduler {
    inner: Arc<GsInner>,
}

struct GsInner {
    id: GsId,
    rm_registry: RmRegistry,
    gs_registry: GsRegistry,
    rm_pinger: Pinger<RmTag, dyn ResourceManagerApi>,
    gs_pinger: Pinger<GsTag, dyn GridSchedulerApi>,
    selector: Selector,
    state: Mutex<GsState>,
    running: AtomicBool,
    recovering: AtomicBool,
    events: mpsc::UnboundedSender<GsEvent>,
}

impl std::fmt::Debug for GridScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridScheduler").field("id", &self.inner.id).field("running", &self.is_running()).finish()
    }
}

impl GridScheduler {
    /// Creates the GS in the stopped state and subscribes it to both registries.
    /// Must be called inside a tokio runtime.
    pub fn spawn(id: GsId, rm_registry: RmRegistry, gs_registry: GsRegistry, probe_interval: Duration, selector: Selector) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let rm_events = tx.clone();
        rm_registry.on_offline(move |rm_id| {
            let _ = rm_events.send(GsEvent::ResourceManagerOffline(rm_id));
        });
        let gs_events = tx.clone();
        gs_registry.on_offline(move |gs_id| {
            let _ = gs_events.send(GsEvent::GridSchedulerOffline(gs_id));
        });

        let inner = Arc::new(GsInner {
            id,
            rm_pinger: Pinger::new(rm_registry.clone(), probe_interval),
            gs_pinger: Pinger::new(gs_registry.clone(), probe_interval),
            rm_registry,
            gs_registry,
            selector,
            state: Mutex::new(GsState::default()),
            running: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            events: tx,
        });

        tokio::spawn(run_events(Arc::downgrade(&inner), rx));

        GridScheduler { inner }
    }

    /// `spawn` followed by `start`.
    pub async fn launch(id: GsId, rm_registry: RmRegistry, gs_registry: GsRegistry, probe_interval: Duration, selector: Selector) -> Result<Self> {
        let gs = Self::spawn(id, rm_registry, gs_registry, probe_interval, selector);
        gs.start().await?;
        Ok(gs)
    }

    pub fn id(&self) -> GsId {
        self.inner.id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.recovering.load(Ordering::SeqCst)
    }

    pub fn monitored_jobs(&self, rm_id: RmId) -> Vec<Job> {
        self.inner.lock_state().monitored_jobs(rm_id)
    }

    pub fn backed_up_jobs(&self, gs_id: GsId) -> Vec<Job> {
        self.inner.lock_state().backed_up_jobs(gs_id)
    }

    pub fn monitored_count(&self) -> usize {
        self.inner.lock_state().monitored_count()
    }

    pub fn backup_holder(&self, job_id: JobId) -> Option<GsId> {
        self.inner.lock_state().backup_holder(job_id)
    }

    pub fn snapshot(&self) -> GsSnapshot {
        let state = self.inner.lock_state();

        GsSnapshot {
            id: self.inner.id,
            running: self.is_running(),
            recovering: self.is_recovering(),
            monitored: self.inner.rm_registry.ids().into_iter().map(|rm_id| (rm_id, state.monitored_jobs(rm_id))).filter(|(_, jobs)| !jobs.is_empty()).collect(),
            backed_up: self.inner.gs_registry.ids().into_iter().map(|gs_id| (gs_id, state.backed_up_jobs(gs_id))).filter(|(_, jobs)| !jobs.is_empty()).collect(),
        }
    }

    pub fn rm_registry(&self) -> &RmRegistry {
        &self.inner.rm_registry
    }

    pub fn gs_registry(&self) -> &GsRegistry {
        &self.inner.gs_registry
    }
}

#[async_trait]
impl Addressable for GridScheduler {
    async fn ping(&self) -> Result<Heartbeat> {
        self.inner.ensure_running()?;
        Ok(Heartbeat { load: 1 + self.monitored_count() as u64 })
    }
}

#[async_trait]
impl GridSchedulerApi for GridScheduler {
    async fn monitor(&self, request: MonitoringRequest) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        let job = request.work_request.job.assigned_to(request.source_id);
        let work_request = WorkRequest::new(job, Source::ResourceManager(request.source_id));

        if inner.lock_state().file_monitored(request.source_id, work_request) {
            log::info!("[GS {}] Monitoring job {} on RM {}", inner.id, job.job_id, request.source_id);
            inner.record("Monitor", &job);
            inner.replicate(work_request).await;
        }
        Ok(())
    }

    async fn back_up(&self, request: BackUpRequest) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        inner.lock_state().file_backup(request.source_id, request.work_request);
        log::info!("[GS {}] Backing up job {} for GS {}", inner.id, request.work_request.job.job_id, request.source_id);
        Ok(())
    }

    async fn promote(&self, request: PromotionRequest) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        inner.promote_entry(request.source_id, request.work_request);
        Ok(())
    }

    async fn off_load(&self, job: Job) -> Result<RmId> {
        let inner = &self.inner;
        inner.ensure_running()?;

        let exclude: Vec<RmId> = job.current_resource_manager_id.into_iter().collect();

        match inner.place(job, &exclude).await {
            Some(placed) => {
                inner.record("OffLoad", &placed.work_request.job);
                inner.replicate(placed.work_request).await;
                Ok(placed.rm_id)
            }
            None => {
                log::error!("[GS {}] No resource manager could take job {}, the job is dropped", inner.id, job.job_id);
                Err(Error::NoCapacityAvailable(format!("no resource manager accepted job {}", job.job_id)))
            }
        }
    }

    async fn release_monitored(&self, request: MonitoringRequest) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_running()?;

        let job_id = request.work_request.job.job_id;

        let (released, holder) = {
            let mut state = inner.lock_state();

            match state.unfile_monitored(request.source_id, job_id) {
                Some(_) => (true, state.take_backup_holder(job_id)),
                None => {
                    if let Some(owner) = state.monitored_under(job_id) {
                        log::warn!("[GS {}] Ignoring completion of job {} from RM {}, it now belongs to RM {}", inner.id, job_id, request.source_id, owner);
                    }
                    (false, None)
                }
            }
        };

        if released {
            log::info!("[GS {}] Stop monitoring job {}", inner.id, job_id);
            inner.record("Release", &request.work_request.job);
        }

        if let Some(holder) = holder {
            inner.release_back_up_at(holder, request.work_request).await;
        }

        Ok(released)
    }

    async fn release_back_up(&self, request: BackUpRequest) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_running()?;

        let released = inner.lock_state().release_backup(request.source_id, request.work_request.job.job_id);
        if released {
            log::info!("[GS {}] Releasing back-up of job {}", inner.id, request.work_request.job.job_id);
        }
        Ok(released)
    }

    async fn receive_resource_manager_wake_up_announcement(&self, from: RmId) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        log::info!("[GS {}] RM {} awake", inner.id, from);

        let stale: Vec<JobId> = inner.lock_state().monitored_jobs(from).iter().map(|job| job.job_id).collect();
        if !stale.is_empty() {
            log::warn!("[GS {}] RM {} restarted and lost {} monitored jobs", inner.id, from, stale.len());
            let _ = inner.events.send(GsEvent::ResourceManagerRestarted(from, stale));
        }

        inner.rm_registry.set_status(from, Status::Online);
        Ok(())
    }

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_running()?;

        log::info!("[GS {}] GS {} awake", inner.id, from);

        let stale: Vec<JobId> = inner.lock_state().backed_up_jobs(from).iter().map(|job| job.job_id).collect();
        if !stale.is_empty() {
            log::warn!("[GS {}] GS {} restarted without the {} jobs backed up here", inner.id, from, stale.len());
            let _ = inner.events.send(GsEvent::GridSchedulerRestarted(from, stale));
        }

        inner.gs_registry.set_status(from, Status::Online);
        Ok(())
    }

    async fn get_id(&self) -> Result<GsId> {
        self.inner.ensure_running()?;
        Ok(self.inner.id)
    }

    async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        inner.lock_state().clear();

        // Peers treat whatever they hold for this GS as lost once the announcement lands, so no
        // work is taken on before every announcement is out.
        inner.announce_wake_up().await;
        inner.running.store(true, Ordering::SeqCst);

        inner.rm_pinger.start();
        inner.gs_pinger.start();
        inner.recovering.store(false, Ordering::SeqCst);

        log::info!("[GS {}] Online", inner.id);
        Ok(())
    }

    async fn shut_down(&self) -> Result<()> {
        let inner = &self.inner;

        inner.running.store(false, Ordering::SeqCst);
        inner.lock_state().clear();

        inner.rm_pinger.stop();
        inner.gs_pinger.stop();

        log::info!("[GS {}] Offline", inner.id);
        Ok(())
    }
}

/// Result of a successful placement.
struct Placement {
    rm_id: RmId,
    work_request: WorkRequest,
}

impl GsInner {
    fn lock_state(&self) -> MutexGuard<'_, GsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) { Ok(()) } else { Err(Error::InstanceOffline(format!("GS {}", self.id))) }
    }

    /// Picks an RM outside `exclude`, files the job under it and orders the work.
    ///
    /// The entry is filed before the order goes out, so a completion can never overtake it.
    async fn place(&self, job: Job, exclude: &[RmId]) -> Option<Placement> {
        self.rm_registry
            .select_and_invoke(
                |rm, rm_id| async move {
                    let job = job.assigned_to(rm_id);
                    let work_request = WorkRequest::new(job, Source::ResourceManager(rm_id));

                    self.lock_state().file_monitored(rm_id, work_request);
                    log::info!("[GS {}] Sending job {} to RM {}", self.id, job.job_id, rm_id);

                    let order = WorkOrder::new(self.id, WorkRequest::new(job, Source::GridScheduler(self.id)));
                    match rm.order_work(order).await {
                        Ok(()) => Ok(Placement { rm_id, work_request }),
                        Err(e) => {
                            self.lock_state().unfile_monitored(rm_id, job.job_id);
                            Err(e)
                        }
                    }
                },
                self.selector,
                exclude,
            )
            .await
    }

    /// Mirrors a monitored entry to one peer GS.
    async fn replicate(&self, work_request: WorkRequest) {
        let request = BackUpRequest::new(self.id, work_request);
        let job_id = work_request.job.job_id;

        let holder = self
            .gs_registry
            .select_and_invoke(
                |gs, gs_id| async move {
                    gs.back_up(request).await?;
                    Ok(gs_id)
                },
                self.selector,
                &[self.id],
            )
            .await;

        let Some(holder) = holder else {
            log::warn!("[GS {}] No peer available to back up job {}", self.id, job_id);
            return;
        };

        let released = {
            let mut state = self.lock_state();
            if state.monitored_under(job_id).is_some() {
                state.set_backup_holder(job_id, holder);
                false
            } else {
                true
            }
        };

        // The job finished while the backup was in flight.
        if released {
            self.release_back_up_at(holder, work_request).await;
        }
    }

    /// Sends the updated entry to the current holder, or picks a new one.
    async fn refresh_backup(&self, work_request: WorkRequest) {
        let holder = self.lock_state().backup_holder(work_request.job.job_id);

        if let Some(holder) = holder {
            let request = BackUpRequest::new(self.id, work_request);
            let outcome = match self.gs_registry.lookup(holder) {
                Ok(gs) => gs.back_up(request).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => return,
                Err(e) if e.is_peer_failure() => {
                    self.gs_registry.report_failure(holder);
                }
                Err(_) => {}
            }
        }

        self.replicate(work_request).await;
    }

    async fn release_back_up_at(&self, holder: GsId, work_request: WorkRequest) {
        let request = BackUpRequest::new(self.id, work_request);
        let outcome = match self.gs_registry.lookup(holder) {
            Ok(gs) => gs.release_back_up(request).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            log::debug!("[GS {}] Could not release back-up of job {} at GS {}: {}", self.id, work_request.job.job_id, holder, e);
            if e.is_peer_failure() {
                self.gs_registry.report_failure(holder);
            }
        }
    }

    /// Moves one entry from the backup set of `source` into the monitored set.
    fn promote_entry(&self, source: GsId, work_request: WorkRequest) -> Option<RmId> {
        let job = work_request.job;

        let Some(rm_id) = job.current_resource_manager_id else {
            log::warn!("[GS {}] Cannot promote job {}, it is not attributed to any RM", self.id, job.job_id);
            return None;
        };

        {
            let mut state = self.lock_state();
            state.release_backup(source, job.job_id);
            state.file_monitored(rm_id, WorkRequest::new(job, Source::ResourceManager(rm_id)));
        }

        log::info!("[GS {}] Promoted to primary for job {} on RM {} (was backed up for GS {})", self.id, job.job_id, rm_id, source);
        self.record("Promote", &job);
        Some(rm_id)
    }

    /// Tells every RM and every other GS this GS is back. Failures are ignored.
    async fn announce_wake_up(&self) {
        let rm_announcements = self.rm_registry.ids().into_iter().map(|rm_id| async move {
            if let Ok(rm) = self.rm_registry.lookup(rm_id) {
                if let Err(e) = rm.receive_grid_scheduler_wake_up_announcement(self.id).await {
                    log::debug!("[GS {}] RM {} missed the wake-up announcement: {}", self.id, rm_id, e);
                }
            }
        });

        let gs_announcements = self.gs_registry.ids_except(&[self.id]).into_iter().map(|gs_id| async move {
            if let Ok(gs) = self.gs_registry.lookup(gs_id) {
                if let Err(e) = gs.receive_grid_scheduler_wake_up_announcement(self.id).await {
                    log::debug!("[GS {}] GS {} missed the wake-up announcement: {}", self.id, gs_id, e);
                }
            }
        });

        futures::join!(join_all(rm_announcements), join_all(gs_announcements));
    }

    fn record(&self, command: &str, job: &Job) {
        let load = 1 + self.lock_state().monitored_count() as u64;

        statistics::add_global_event(
            StatisticEvent::new()
                .set(StatParameter::Component, "GS")
                .set(StatParameter::ComponentName, format!("GS {}", self.id))
                .set(StatParameter::JobId, job.job_id.id)
                .set(StatParameter::Command, command)
                .set(StatParameter::Duration, job.duration)
                .set(StatParameter::Load, load),
        );
    }
}

/// Recovery entry points, run by the event task.
impl GsInner {
    /// Re-issues the given jobs still monitored under the failed RM, or all of them when `jobs`
    /// is `None`. Individual reschedules run detached; the pass is over once all are issued.
    async fn reschedule(self: &Arc<Self>, failed: RmId, jobs: Option<Vec<JobId>>) {
        if self.ensure_running().is_err() {
            return;
        }

        if self.recovering.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            log::warn!("[GS {}] Recovery already in progress, RM {} is handled by it", self.id, failed);
            return;
        }

        let orphans = jobs.unwrap_or_else(|| self.lock_state().monitored_jobs(failed).iter().map(|job| job.job_id).collect());
        log::warn!("[GS {}] Lost RM {}, rescheduling {} jobs", self.id, failed, orphans.len());

        for job_id in orphans {
            let inner = self.clone();
            tokio::spawn(async move { inner.reschedule_job(failed, job_id).await });
        }

        self.recovering.store(false, Ordering::SeqCst);
    }

    /// Moves one job off the failed RM. Only the caller that unfiles the entry places it again,
    /// so concurrent recovery paths never run a job twice.
    async fn reschedule_job(&self, failed: RmId, job_id: JobId) {
        let Some(orphan) = self.lock_state().unfile_monitored(failed, job_id) else {
            log::debug!("[GS {}] Job {} is no longer filed under RM {}", self.id, job_id, failed);
            return;
        };
        let job = orphan.job;

        match self.place(job, &[failed]).await {
            Some(placed) => {
                log::info!("[GS {}] Rescheduled job {} from RM {} to RM {}", self.id, job.job_id, failed, placed.rm_id);
                tracing::info!(gs = %self.id, job = %job.job_id, from = %failed, to = %placed.rm_id, "job rescheduled");
                self.record("Reschedule", &placed.work_request.job);
                self.refresh_backup(placed.work_request).await;
            }
            None => {
                log::error!("[GS {}] No resource manager could take job {} after RM {} failed, the job is dropped", self.id, job.job_id, failed);
                let holder = self.lock_state().take_backup_holder(job.job_id);
                if let Some(holder) = holder {
                    self.release_back_up_at(holder, orphan).await;
                }
            }
        }
    }

    /// Takes over every job backed up for the failed peer GS.
    async fn take_over(self: &Arc<Self>, failed: GsId, jobs: Option<Vec<JobId>>) {
        if self.ensure_running().is_err() {
            return;
        }

        let entries = match jobs {
            Some(job_ids) => self.lock_state().take_backed_up_jobs(failed, &job_ids),
            None => self.lock_state().take_backed_up(failed),
        };
        if entries.is_empty() {
            return;
        }

        log::warn!("[GS {}] GS {} went offline, taking over {} jobs", self.id, failed, entries.len());

        for work_request in entries {
            let Some(rm_id) = self.promote_entry(failed, work_request) else {
                continue;
            };

            let inner = self.clone();
            tokio::spawn(async move {
                let promoted = WorkRequest::new(work_request.job, Source::ResourceManager(rm_id));

                // The RM may have failed while the old primary was watching it.
                if inner.rm_registry.probe(rm_id).await.is_some() {
                    inner.replicate(promoted).await;
                } else {
                    inner.reschedule_job(rm_id, promoted.job.job_id).await;
                }
            });
        }
    }
}

async fn run_events(inner: Weak<GsInner>, mut rx: mpsc::UnboundedReceiver<GsEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            GsEvent::ResourceManagerOffline(rm_id) => inner.reschedule(rm_id, None).await,
            GsEvent::GridSchedulerOffline(gs_id) => inner.take_over(gs_id, None).await,
            GsEvent::ResourceManagerRestarted(rm_id, jobs) => inner.reschedule(rm_id, Some(jobs)).await,
            GsEvent::GridSchedulerRestarted(gs_id, jobs) => inner.take_over(gs_id, Some(jobs)).await,
        }
    }
}
