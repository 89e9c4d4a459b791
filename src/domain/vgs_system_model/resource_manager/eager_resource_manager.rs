use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::domain::simulator::simulator::SharedSimulator;
use crate::domain::vgs_system_model::client::client::JobResultHandler;
use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::discovery::registry::GsRegistry;
use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::domain::vgs_system_model::discovery::status::Status;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{Heartbeat, MonitoringRequest, WorkOrder};
use crate::domain::vgs_system_model::model::work_request::{Source, WorkRequest};
use crate::domain::vgs_system_model::resource_manager::node::Node;
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::domain::vgs_system_model::resource_manager::rm_message::RmMessage;
use crate::domain::vgs_system_model::utils::id::{GsId, JobId, NodeId, RmId};
use crate::domain::vgs_system_model::utils::statistics::{self, StatParameter, StatisticEvent};
use crate::error::{Error, Result};

/// Point-in-time view of an RM's scheduling state.
#[derive(Debug, Clone)]
pub struct RmSnapshot {
    pub id: RmId,
    pub running: bool,
    pub generation: u64,
    pub load: u64,
    pub queued_jobs: Vec<Job>,
    pub idle_nodes: Vec<NodeId>,
    pub running_jobs: Vec<(NodeId, Job)>,
    pub monitors: HashMap<JobId, GsId>,
}

/// Handle to a resource manager that dispatches eagerly: a job starts as soon as a node is idle.
///
/// The queue, the idle list and the load counter live in a single task; the handle forwards every
/// call to it, so all mutations of that state are serialized. Node timers and result delivery run
/// as separate tasks and never block the caller.
#[derive(Debug, Clone)]
pub struct EagerResourceManager {
    id: RmId,
    tx: mpsc::UnboundedSender<RmMessage>,
    gs_registry: GsRegistry,
    selector: Selector,
}

impl EagerResourceManager {
    /// Creates the RM in the stopped state. Must be called inside a tokio runtime.
    pub fn spawn(
        id: RmId,
        number_of_nodes: usize,
        gs_registry: GsRegistry,
        result_handler: Arc<dyn JobResultHandler>,
        simulator: SharedSimulator,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = ResourceManagerActor {
            id,
            number_of_nodes,
            running: false,
            starting: false,
            generation: 0,
            nodes: Vec::new(),
            idle_nodes: VecDeque::new(),
            job_queue: VecDeque::new(),
            load: 0,
            monitors: HashMap::new(),
            gs_registry: gs_registry.clone(),
            result_handler,
            simulator,
            mailbox: tx.downgrade(),
        };

        tokio::spawn(actor.run(rx));

        EagerResourceManager { id, tx, gs_registry, selector: Selector::default() }
    }

    /// `spawn` followed by `start`.
    pub async fn launch(
        id: RmId,
        number_of_nodes: usize,
        gs_registry: GsRegistry,
        result_handler: Arc<dyn JobResultHandler>,
        simulator: SharedSimulator,
    ) -> Result<Self> {
        let rm = Self::spawn(id, number_of_nodes, gs_registry, result_handler, simulator);
        rm.start().await?;
        Ok(rm)
    }

    /// Strategy used to pick the GS that monitors directly queued jobs.
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    pub fn id(&self) -> RmId {
        self.id
    }

    pub async fn snapshot(&self) -> Result<RmSnapshot> {
        self.call(RmMessage::Snapshot).await
    }

    pub async fn load(&self) -> Result<u64> {
        Ok(self.snapshot().await?.load)
    }

    pub async fn idle_nodes(&self) -> Result<Vec<NodeId>> {
        Ok(self.snapshot().await?.idle_nodes)
    }

    pub async fn queued_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.snapshot().await?.queued_jobs)
    }

    async fn call<R, F>(&self, msg_builder: F) -> Result<R>
    where
        F: FnOnce(oneshot::Sender<R>) -> RmMessage,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx.send(msg_builder(reply_tx)).map_err(|_| self.gone())?;
        reply_rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> Error {
        Error::InstanceOffline(format!("RM {}", self.id))
    }

    /// Tells every GS this RM is back. Unreachable schedulers are skipped.
    async fn announce_wake_up(&self) {
        let announcements = self.gs_registry.ids().into_iter().map(|gs_id| async move {
            let outcome = match self.gs_registry.lookup(gs_id) {
                Ok(gs) => gs.receive_resource_manager_wake_up_announcement(self.id).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                log::debug!("[RM {}] Wake-up announcement to GS {} failed: {}", self.id, gs_id, e);
                if e.is_peer_failure() {
                    self.gs_registry.report_failure(gs_id);
                }
            }
        });

        join_all(announcements).await;
    }

    /// Finds a GS willing to monitor a directly queued job and records it with the actor.
    async fn find_monitor(&self, job: Job) {
        let request = MonitoringRequest::new(self.id, WorkRequest::new(job, Source::ResourceManager(self.id)));

        let monitor = self
            .gs_registry
            .select_and_invoke(
                |gs, gs_id| async move {
                    gs.monitor(request).await?;
                    Ok(gs_id)
                },
                self.selector,
                &[],
            )
            .await;

        match monitor {
            Some(gs_id) => {
                let _ = self.tx.send(RmMessage::SetMonitor { job, gs_id });
            }
            None => log::warn!("[RM {}] No grid scheduler available to monitor job {}", self.id, job.job_id),
        }
    }
}

#[async_trait]
impl Addressable for EagerResourceManager {
    async fn ping(&self) -> Result<Heartbeat> {
        self.call(RmMessage::Ping).await?
    }
}

#[async_trait]
impl ResourceManagerApi for EagerResourceManager {
    async fn order_work(&self, order: WorkOrder) -> Result<()> {
        self.call(|reply_to| RmMessage::OrderWork { order, reply_to }).await?
    }

    async fn queue(&self, job: Job) -> Result<()> {
        let accepted = self.call(|reply_to| RmMessage::Queue { job, reply_to }).await??;

        if let Some(job) = accepted {
            let rm = self.clone();
            tokio::spawn(async move { rm.find_monitor(job).await });
        }

        Ok(())
    }

    async fn finish(&self, node_id: NodeId, job: Job) -> Result<bool> {
        self.call(|reply_to| RmMessage::Finish { node_id, job, generation: None, reply_to: Some(reply_to) }).await
    }

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()> {
        self.call(|reply_to| RmMessage::WakeUp { from, reply_to }).await??;

        if self.gs_registry.set_status(from, Status::Online) {
            log::info!("[RM {}] GS {} announced itself", self.id, from);
        }
        Ok(())
    }

    async fn get_id(&self) -> Result<RmId> {
        self.call(RmMessage::GetId).await?
    }

    /// Resets the RM and announces it. Work is accepted only once every GS has heard of the
    /// restart, so whatever a GS still files under this RM at that point belongs to the old run.
    async fn start(&self) -> Result<()> {
        self.call(RmMessage::Start).await?;
        self.announce_wake_up().await;
        self.call(RmMessage::Resume).await
    }

    async fn shut_down(&self) -> Result<()> {
        self.call(RmMessage::ShutDown).await
    }
}

/// The state owned by the RM task.
struct ResourceManagerActor {
    id: RmId,
    number_of_nodes: usize,
    running: bool,

    /// Reset by `start` but not yet accepting work.
    starting: bool,

    /// Bumped on every start; timers of an earlier incarnation carry a stale value.
    generation: u64,

    nodes: Vec<Node>,
    idle_nodes: VecDeque<NodeId>,
    job_queue: VecDeque<Job>,

    /// Sum of the durations of all queued and running jobs.
    load: u64,

    /// The GS watching each job, when known.
    monitors: HashMap<JobId, GsId>,

    gs_registry: GsRegistry,
    result_handler: Arc<dyn JobResultHandler>,
    simulator: SharedSimulator,
    mailbox: mpsc::WeakUnboundedSender<RmMessage>,
}

impl ResourceManagerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RmMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle_message(msg);
        }

        self.halt();
        log::debug!("[RM {}] All handles dropped, task ends", self.id);
    }

    fn handle_message(&mut self, msg: RmMessage) {
        match msg {
            RmMessage::OrderWork { order, reply_to } => {
                let _ = reply_to.send(self.order_work(order));
            }
            RmMessage::Queue { job, reply_to } => {
                let _ = reply_to.send(self.queue(job));
            }
            RmMessage::SetMonitor { job, gs_id } => self.set_monitor(job, gs_id),
            RmMessage::Finish { node_id, job, generation, reply_to } => {
                let finished = self.finish(node_id, job, generation);
                if let Some(reply_to) = reply_to {
                    let _ = reply_to.send(finished);
                }
            }
            RmMessage::Ping(reply_to) => {
                let _ = reply_to.send(self.ensure_running().map(|_| Heartbeat { load: self.load }));
            }
            RmMessage::WakeUp { from: _, reply_to } => {
                let _ = reply_to.send(self.ensure_running());
            }
            RmMessage::GetId(reply_to) => {
                let _ = reply_to.send(self.ensure_running().map(|_| self.id));
            }
            RmMessage::Snapshot(reply_to) => {
                let _ = reply_to.send(self.snapshot());
            }
            RmMessage::Start(reply_to) => {
                self.start();
                let _ = reply_to.send(());
            }
            RmMessage::Resume(reply_to) => {
                self.resume();
                let _ = reply_to.send(());
            }
            RmMessage::ShutDown(reply_to) => {
                self.halt();
                log::info!("[RM {}] Shut down", self.id);
                let _ = reply_to.send(());
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running { Ok(()) } else { Err(Error::InstanceOffline(format!("RM {}", self.id))) }
    }

    fn start(&mut self) {
        self.halt();
        self.generation += 1;

        self.nodes = (0..self.number_of_nodes).map(|index| Node::new(NodeId::new(index as u32), self.id)).collect();
        self.idle_nodes = self.nodes.iter().map(|node| node.node_id).collect();
        self.starting = true;
    }

    /// Opens a started RM for work. A shutdown in between wins.
    fn resume(&mut self) {
        if !self.starting {
            return;
        }

        self.starting = false;
        self.running = true;
        log::info!("[RM {}] Started with {} nodes (generation {})", self.id, self.number_of_nodes, self.generation);
    }

    /// Drops every queued and running job. Running timers are aborted.
    fn halt(&mut self) {
        for node in self.nodes.iter_mut() {
            node.set_idle();
        }

        self.idle_nodes.clear();
        self.job_queue.clear();
        self.monitors.clear();
        self.load = 0;
        self.running = false;
        self.starting = false;
    }

    fn order_work(&mut self, order: WorkOrder) -> Result<()> {
        self.ensure_running()?;

        let job = order.work_request.job;
        self.monitors.insert(job.job_id, order.issuing_gs_id);

        if self.is_active(job.job_id) {
            log::warn!("[RM {}] Job {} is already here, order from GS {} only updates its monitor", self.id, job.job_id, order.issuing_gs_id);
            return Ok(());
        }

        log::info!("[RM {}] Received job {} from GS {}", self.id, job.job_id, order.issuing_gs_id);
        self.enqueue(job);
        Ok(())
    }

    fn queue(&mut self, job: Job) -> Result<Option<Job>> {
        self.ensure_running()?;

        if self.is_active(job.job_id) {
            log::warn!("[RM {}] Job {} is already queued or running, ignoring resubmission", self.id, job.job_id);
            return Ok(None);
        }

        log::info!("[RM {}] Received job {} from a client", self.id, job.job_id);
        Ok(Some(self.enqueue(job)))
    }

    fn enqueue(&mut self, job: Job) -> Job {
        let job = job.assigned_to(self.id);

        self.load = self.load.saturating_add(job.duration);
        self.job_queue.push_back(job);
        self.record("Enqueue", &job);

        self.dispatch();
        job
    }

    fn set_monitor(&mut self, job: Job, gs_id: GsId) {
        if self.is_active(job.job_id) {
            self.monitors.insert(job.job_id, gs_id);
            return;
        }

        // Finished before the monitor was found; its release broadcast may have missed this GS.
        let request = MonitoringRequest::new(self.id, WorkRequest::new(job, Source::ResourceManager(self.id)));
        let registry = self.gs_registry.clone();
        tokio::spawn(async move {
            let _ = release_on(&registry, gs_id, request).await;
        });
    }

    fn is_active(&self, job_id: JobId) -> bool {
        self.job_queue.iter().any(|job| job.job_id == job_id)
            || self.nodes.iter().any(|node| node.current_job().is_some_and(|job| job.job_id == job_id))
    }

    /// Pairs queued jobs with idle nodes, in FIFO order on both sides.
    fn dispatch(&mut self) {
        while !self.job_queue.is_empty() && !self.idle_nodes.is_empty() {
            let (Some(node_id), Some(job)) = (self.idle_nodes.pop_front(), self.job_queue.pop_front()) else {
                break;
            };

            let Some(node) = self.nodes.get_mut(node_id.index()) else {
                log::error!("[RM {}] Idle list holds unknown node {}", self.id, node_id);
                self.job_queue.push_front(job);
                continue;
            };

            node.handle(job, self.generation, &self.simulator, self.mailbox.clone());

            log::debug!("[RM {}] Job {} started on node {}", self.id, job.job_id, node_id);
            tracing::debug!(rm = %self.id, node = %node_id, job = %job.job_id, duration = job.duration, "job dispatched");
            self.record("Dispatch", &job);
        }
    }

    fn finish(&mut self, node_id: NodeId, job: Job, generation: Option<u64>) -> bool {
        if !self.running {
            log::debug!("[RM {}] Ignoring completion of job {} while stopped", self.id, job.job_id);
            return false;
        }

        if generation.is_some_and(|generation| generation != self.generation) {
            log::debug!("[RM {}] Ignoring completion of job {} from an earlier run", self.id, job.job_id);
            return false;
        }

        let Some(node) = self.nodes.get_mut(node_id.index()) else {
            log::warn!("[RM {}] Completion reported by unknown node {}", self.id, node_id);
            return false;
        };

        if node.current_job().map(|current| current.job_id) != Some(job.job_id) {
            log::warn!("[RM {}] Node {} is not running job {}", self.id, node_id, job.job_id);
            return false;
        }

        let Some(job) = node.set_idle() else {
            return false;
        };

        if self.load < job.duration {
            log::error!("[RM {}] Load {} is below the duration {} of finished job {}", self.id, self.load, job.duration, job.job_id);
        }
        self.load = self.load.saturating_sub(job.duration);

        if !self.idle_nodes.contains(&node_id) {
            self.idle_nodes.push_back(node_id);
        }

        log::info!("[RM {}] Job {} finished on node {}", self.id, job.job_id, node_id);
        tracing::debug!(rm = %self.id, node = %node_id, job = %job.job_id, load = self.load, "job finished");
        self.record("Finish", &job);

        self.respond(job);
        self.dispatch();
        true
    }

    /// Delivers the result, then tells the monitoring GS the job is done.
    fn respond(&mut self, job: Job) {
        let monitor = self.monitors.remove(&job.job_id);
        let handler = self.result_handler.clone();
        let registry = self.gs_registry.clone();
        let id = self.id;

        tokio::spawn(async move {
            if let Err(e) = handler.accept_result(job).await {
                log::warn!("[RM {}] Result of job {} was not accepted: {}", id, job.job_id, e);
            }
            release_monitoring(&registry, id, job, monitor).await;
        });
    }

    fn snapshot(&self) -> RmSnapshot {
        RmSnapshot {
            id: self.id,
            running: self.running,
            generation: self.generation,
            load: self.load,
            queued_jobs: self.job_queue.iter().copied().collect(),
            idle_nodes: self.idle_nodes.iter().copied().collect(),
            running_jobs: self.nodes.iter().filter_map(|node| node.current_job().map(|job| (node.node_id, *job))).collect(),
            monitors: self.monitors.clone(),
        }
    }

    fn record(&self, command: &str, job: &Job) {
        statistics::add_global_event(
            StatisticEvent::new()
                .set(StatParameter::Component, "RM")
                .set(StatParameter::ComponentName, format!("RM {}", self.id))
                .set(StatParameter::JobId, job.job_id.id)
                .set(StatParameter::Command, command)
                .set(StatParameter::Duration, job.duration)
                .set(StatParameter::Load, self.load),
        );
    }
}

/// Releases the watch on a finished job. Goes to the known monitor first and falls back to
/// every other GS when the monitor is unknown, unreachable or no longer holds the job.
async fn release_monitoring(registry: &GsRegistry, rm_id: RmId, job: Job, monitor: Option<GsId>) {
    let request = MonitoringRequest::new(rm_id, WorkRequest::new(job, Source::ResourceManager(rm_id)));

    if let Some(gs_id) = monitor {
        match release_on(registry, gs_id, request).await {
            Ok(true) => return,
            // A restarted monitor has forgotten the job; a peer may have taken it over.
            Ok(false) => log::debug!("[RM {}] GS {} no longer monitors job {}", rm_id, gs_id, job.job_id),
            Err(e) => log::warn!("[RM {}] Could not release job {} at GS {}: {}", rm_id, job.job_id, gs_id, e),
        }
    }

    let exclude: Vec<GsId> = monitor.into_iter().collect();
    let releases = registry.ids_except(&exclude).into_iter().map(|gs_id| async move { (gs_id, release_on(registry, gs_id, request).await) });

    for (gs_id, outcome) in join_all(releases).await {
        if let Ok(true) = outcome {
            log::debug!("[RM {}] GS {} released job {}", rm_id, gs_id, job.job_id);
        }
    }
}

async fn release_on(registry: &GsRegistry, gs_id: GsId, request: MonitoringRequest) -> Result<bool> {
    let outcome = match registry.lookup(gs_id) {
        Ok(gs) => gs.release_monitored(request).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        if e.is_peer_failure() {
            registry.report_failure(gs_id);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::simulator::simulator_mock::MockSimulator;
    use crate::domain::vgs_system_model::client::client::ResultCollector;
    use crate::domain::vgs_system_model::discovery::naming::LocalNaming;
    use crate::domain::vgs_system_model::utils::id::JobId;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn empty_gs_registry() -> GsRegistry {
        GsRegistry::new("GS", BTreeMap::new(), Arc::new(LocalNaming::new()))
    }

    async fn launch(nodes: usize) -> (EagerResourceManager, Arc<ResultCollector>) {
        let results = Arc::new(ResultCollector::new());
        let rm = EagerResourceManager::launch(RmId::new(0), nodes, empty_gs_registry(), results.clone(), Arc::new(MockSimulator::new(0)))
            .await
            .unwrap();
        (rm, results)
    }

    #[tokio::test(start_paused = true)]
    async fn single_node_runs_jobs_in_fifo_order() {
        let (rm, results) = launch(1).await;

        rm.queue(Job::new(JobId::new(1), 10)).await.unwrap();
        rm.queue(Job::new(JobId::new(2), 5)).await.unwrap();

        let snapshot = rm.snapshot().await.unwrap();
        assert_eq!(snapshot.load, 15);
        assert_eq!(snapshot.queued_jobs.len(), 1);
        assert!(snapshot.idle_nodes.is_empty());

        assert!(results.wait_for(2, Duration::from_secs(1)).await);

        let finished: Vec<JobId> = results.results().iter().map(|job| job.job_id).collect();
        assert_eq!(finished, vec![JobId::new(1), JobId::new(2)]);
        assert!(results.results().iter().all(|job| job.current_resource_manager_id == Some(RmId::new(0))));

        let snapshot = rm.snapshot().await.unwrap();
        assert_eq!(snapshot.load, 0);
        assert_eq!(snapshot.idle_nodes, vec![NodeId::new(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_nodes_start_jobs_immediately() {
        let (rm, _results) = launch(3).await;

        for id in 0..2 {
            rm.queue(Job::new(JobId::new(id), 100)).await.unwrap();
        }

        let snapshot = rm.snapshot().await.unwrap();
        assert_eq!(snapshot.running_jobs.len(), 2);
        assert!(snapshot.queued_jobs.is_empty());
        assert_eq!(snapshot.idle_nodes, vec![NodeId::new(2)]);
        assert_eq!(rm.ping().await.unwrap(), Heartbeat { load: 200 });
    }

    #[tokio::test(start_paused = true)]
    async fn order_work_records_the_issuing_scheduler() {
        let (rm, _results) = launch(1).await;
        let job = Job::new(JobId::new(4), 50);

        rm.order_work(WorkOrder::new(GsId::new(1), WorkRequest::new(job, Source::GridScheduler(GsId::new(1))))).await.unwrap();

        let snapshot = rm.snapshot().await.unwrap();
        assert_eq!(snapshot.monitors.get(&JobId::new(4)), Some(&GsId::new(1)));
        assert_eq!(snapshot.running_jobs[0].1.current_resource_manager_id, Some(RmId::new(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_rejects_a_job_the_node_is_not_running() {
        let (rm, results) = launch(1).await;

        rm.queue(Job::new(JobId::new(1), 1_000)).await.unwrap();

        assert!(!rm.finish(NodeId::new(0), Job::new(JobId::new(9), 1)).await.unwrap());
        assert!(!rm.finish(NodeId::new(5), Job::new(JobId::new(1), 1)).await.unwrap());
        assert!(rm.finish(NodeId::new(0), Job::new(JobId::new(1), 1_000)).await.unwrap());

        assert!(results.wait_for(1, Duration::from_millis(10)).await);
        assert_eq!(rm.load().await.unwrap(), 0);

        // The aborted timer must not deliver a second result.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_manager_is_offline() {
        let (rm, _results) = launch(1).await;
        rm.shut_down().await.unwrap();

        assert!(matches!(rm.ping().await, Err(Error::InstanceOffline(_))));
        assert!(matches!(rm.queue(Job::new(JobId::new(1), 1)).await, Err(Error::InstanceOffline(_))));
        assert!(matches!(rm.get_id().await, Err(Error::InstanceOffline(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_drops_jobs_of_the_previous_run() {
        let (rm, results) = launch(1).await;

        rm.queue(Job::new(JobId::new(1), 10)).await.unwrap();
        rm.queue(Job::new(JobId::new(2), 10)).await.unwrap();
        rm.shut_down().await.unwrap();
        rm.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(results.is_empty());
        let snapshot = rm.snapshot().await.unwrap();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.load, 0);
        assert!(snapshot.running);
    }
}
