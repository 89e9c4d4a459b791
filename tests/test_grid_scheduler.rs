mod common;

use std::sync::Arc;
use std::time::Duration;

use vgs_rust_scheduler::domain::vgs_system_model::client::client::ResultCollector;
use vgs_rust_scheduler::domain::vgs_system_model::cluster::LocalCluster;
use vgs_rust_scheduler::domain::vgs_system_model::discovery::addressable::Addressable;
use vgs_rust_scheduler::domain::vgs_system_model::discovery::status::Status;
use vgs_rust_scheduler::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use vgs_rust_scheduler::domain::vgs_system_model::model::job::Job;
use vgs_rust_scheduler::domain::vgs_system_model::model::requests::{BackUpRequest, MonitoringRequest, PromotionRequest};
use vgs_rust_scheduler::domain::vgs_system_model::model::work_request::{Source, WorkRequest};
use vgs_rust_scheduler::domain::vgs_system_model::utils::id::{ClientId, GsId, JobId, RmId};

fn running_on(rm_id: u32, job_id: u32) -> WorkRequest {
    let job = Job::new(JobId::new(job_id), 100).assigned_to(RmId::new(rm_id));
    WorkRequest::new(job, Source::ResourceManager(RmId::new(rm_id)))
}

#[tokio::test(start_paused = true)]
async fn backup_holder_takes_over_when_the_primary_fails() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(1, 2, 1), results).await.unwrap();
    let survivor = cluster.grid_scheduler(GsId::new(1)).unwrap();
    let k = running_on(0, 7);

    survivor.back_up(BackUpRequest::new(GsId::new(0), k)).await.unwrap();
    assert_eq!(survivor.backed_up_jobs(GsId::new(0)).len(), 1);
    assert!(common::eventually(Duration::from_millis(200), || survivor.gs_registry().status(GsId::new(0)) == Status::Online).await);

    cluster.crash_grid_scheduler(GsId::new(0)).await.unwrap();

    assert!(common::eventually(Duration::from_millis(500), || survivor.monitored_jobs(RmId::new(0)).len() == 1).await);
    assert!(survivor.backed_up_jobs(GsId::new(0)).is_empty());

    let released = survivor.release_monitored(MonitoringRequest::new(RmId::new(0), k)).await.unwrap();
    assert!(released);
    assert_eq!(survivor.monitored_count(), 0);

    cluster.shut_down().await;
}

#[tokio::test(start_paused = true)]
async fn promote_moves_an_entry_into_the_monitored_set() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(1, 2, 1), results).await.unwrap();
    let gs = cluster.grid_scheduler(GsId::new(1)).unwrap();
    let k = running_on(0, 3);

    gs.back_up(BackUpRequest::new(GsId::new(0), k)).await.unwrap();
    gs.promote(PromotionRequest::new(GsId::new(0), k)).await.unwrap();

    assert!(gs.backed_up_jobs(GsId::new(0)).is_empty());
    assert_eq!(gs.monitored_jobs(RmId::new(0))[0].job_id, JobId::new(3));
    assert_eq!(gs.ping().await.unwrap().load, 2);

    assert!(gs.release_monitored(MonitoringRequest::new(RmId::new(0), k)).await.unwrap());
    assert!(!gs.release_monitored(MonitoringRequest::new(RmId::new(0), k)).await.unwrap());

    cluster.shut_down().await;
}

#[tokio::test(start_paused = true)]
async fn placed_jobs_are_backed_up_on_the_peer_and_released_on_completion() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(2, 2, 2), results.clone()).await.unwrap();
    let client = cluster.client(ClientId::new(0));

    let (primary_id, rm_id) = client.submit(Job::new(JobId::new(11), 400)).await.unwrap();
    let backup_id = if primary_id == GsId::new(0) { GsId::new(1) } else { GsId::new(0) };

    let primary = cluster.grid_scheduler(primary_id).unwrap();
    let backup = cluster.grid_scheduler(backup_id).unwrap();

    assert_eq!(primary.monitored_jobs(rm_id).len(), 1);
    assert_eq!(primary.backup_holder(JobId::new(11)), Some(backup_id));
    assert_eq!(backup.backed_up_jobs(primary_id)[0].current_resource_manager_id, Some(rm_id));

    assert!(results.wait_for(1, Duration::from_secs(2)).await);
    assert!(common::eventually(Duration::from_millis(200), || primary.monitored_count() == 0 && backup.backed_up_jobs(primary_id).is_empty()).await);

    cluster.shut_down().await;
}

#[tokio::test(start_paused = true)]
async fn work_survives_the_loss_of_its_scheduler() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(1, 2, 1), results.clone()).await.unwrap();
    let client = cluster.client(ClientId::new(0));

    let (primary_id, rm_id) = client.submit(Job::new(JobId::new(5), 1_000)).await.unwrap();
    let backup_id = if primary_id == GsId::new(0) { GsId::new(1) } else { GsId::new(0) };
    let backup = cluster.grid_scheduler(backup_id).unwrap();
    assert!(common::eventually(Duration::from_millis(200), || backup.gs_registry().status(primary_id) == Status::Online).await);

    cluster.crash_grid_scheduler(primary_id).await.unwrap();
    assert!(common::eventually(Duration::from_millis(500), || backup.monitored_jobs(rm_id).len() == 1).await);

    // The RM's release goes to the dead primary first, then falls back to the survivor.
    assert!(results.wait_for(1, Duration::from_secs(3)).await);
    assert!(common::eventually(Duration::from_millis(200), || backup.monitored_count() == 0).await);

    cluster.shut_down().await;
}

#[tokio::test(start_paused = true)]
async fn restarted_scheduler_comes_back_empty_and_online() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(1, 2, 1), results).await.unwrap();
    let gs = cluster.grid_scheduler(GsId::new(0)).unwrap();
    let peer = cluster.grid_scheduler(GsId::new(1)).unwrap();

    gs.monitor(MonitoringRequest::new(RmId::new(0), running_on(0, 1))).await.unwrap();
    cluster.crash_grid_scheduler(GsId::new(0)).await.unwrap();
    assert!(gs.ping().await.is_err());
    assert!(common::eventually(Duration::from_millis(500), || peer.gs_registry().status(GsId::new(0)) == Status::Offline).await);

    cluster.restart_grid_scheduler(GsId::new(0)).await.unwrap();

    assert_eq!(gs.monitored_count(), 0);
    assert_eq!(peer.gs_registry().status(GsId::new(0)), Status::Online);
    assert_eq!(gs.get_id().await.unwrap(), GsId::new(0));

    cluster.shut_down().await;
}
