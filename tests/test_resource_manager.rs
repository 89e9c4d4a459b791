mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use vgs_rust_scheduler::domain::simulator::simulator_mock::MockSimulator;
use vgs_rust_scheduler::domain::vgs_system_model::client::client::ResultCollector;
use vgs_rust_scheduler::domain::vgs_system_model::cluster::LocalCluster;
use vgs_rust_scheduler::domain::vgs_system_model::discovery::addressable::Addressable;
use vgs_rust_scheduler::domain::vgs_system_model::discovery::naming::LocalNaming;
use vgs_rust_scheduler::domain::vgs_system_model::discovery::registry::GsRegistry;
use vgs_rust_scheduler::domain::vgs_system_model::model::job::Job;
use vgs_rust_scheduler::domain::vgs_system_model::resource_manager::eager_resource_manager::EagerResourceManager;
use vgs_rust_scheduler::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use vgs_rust_scheduler::domain::vgs_system_model::utils::id::{GsId, JobId, NodeId, RmId};

fn no_schedulers() -> GsRegistry {
    GsRegistry::new("GS", BTreeMap::new(), Arc::new(LocalNaming::new()))
}

#[tokio::test(start_paused = true)]
async fn second_job_waits_for_the_only_node() {
    let results = Arc::new(ResultCollector::new());
    let rm = EagerResourceManager::launch(RmId::new(0), 1, no_schedulers(), results.clone(), Arc::new(MockSimulator::new(0))).await.unwrap();

    rm.queue(Job::new(JobId::new(1), 10)).await.unwrap();
    rm.queue(Job::new(JobId::new(2), 5)).await.unwrap();

    // t = 5: job 1 still holds the node.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let snapshot = rm.snapshot().await.unwrap();
    assert_eq!(snapshot.running_jobs.len(), 1);
    assert_eq!(snapshot.running_jobs[0].1.job_id, JobId::new(1));
    assert_eq!(snapshot.queued_jobs.len(), 1);
    assert_eq!(snapshot.load, 15);
    assert!(results.is_empty());

    // t = 12: job 1 finished, job 2 took the node over.
    tokio::time::sleep(Duration::from_millis(7)).await;
    let snapshot = rm.snapshot().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(snapshot.running_jobs[0].1.job_id, JobId::new(2));
    assert!(snapshot.queued_jobs.is_empty());
    assert_eq!(snapshot.load, 5);

    assert!(results.wait_for(2, Duration::from_millis(100)).await);
    let order: Vec<JobId> = results.results().iter().map(|job| job.job_id).collect();
    assert_eq!(order, vec![JobId::new(1), JobId::new(2)]);

    assert_eq!(rm.load().await.unwrap(), 0);
    assert_eq!(rm.idle_nodes().await.unwrap(), vec![NodeId::new(0)]);
}

#[tokio::test(start_paused = true)]
async fn load_counts_queued_and_running_jobs() {
    let results = Arc::new(ResultCollector::new());
    let rm = EagerResourceManager::launch(RmId::new(3), 2, no_schedulers(), results.clone(), Arc::new(MockSimulator::new(0))).await.unwrap();

    for (id, duration) in [(1, 30), (2, 20), (3, 10)] {
        rm.queue(Job::new(JobId::new(id), duration)).await.unwrap();
    }

    assert_eq!(rm.ping().await.unwrap().load, 60);
    assert_eq!(rm.queued_jobs().await.unwrap().len(), 1);
    assert!(rm.idle_nodes().await.unwrap().is_empty());

    assert!(results.wait_for(3, Duration::from_secs(1)).await);
    assert_eq!(rm.ping().await.unwrap().load, 0);
    assert_eq!(rm.idle_nodes().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn resubmitting_a_running_job_does_not_run_it_twice() {
    let results = Arc::new(ResultCollector::new());
    let rm = EagerResourceManager::launch(RmId::new(0), 2, no_schedulers(), results.clone(), Arc::new(MockSimulator::new(0))).await.unwrap();

    rm.queue(Job::new(JobId::new(1), 10)).await.unwrap();
    rm.queue(Job::new(JobId::new(1), 10)).await.unwrap();

    assert_eq!(rm.load().await.unwrap(), 10);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(results.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn directly_queued_jobs_are_monitored_and_released() {
    let results = Arc::new(ResultCollector::new());
    let cluster = LocalCluster::launch(&common::cluster_dto(1, 1, 1), results.clone()).await.unwrap();

    let rm = cluster.resource_manager(RmId::new(0)).unwrap();
    let gs = cluster.grid_scheduler(GsId::new(0)).unwrap();

    rm.queue(Job::new(JobId::new(8), 200)).await.unwrap();

    assert!(common::eventually(Duration::from_millis(100), || gs.monitored_jobs(RmId::new(0)).len() == 1).await);
    assert_eq!(gs.monitored_jobs(RmId::new(0))[0].current_resource_manager_id, Some(RmId::new(0)));

    assert!(results.wait_for(1, Duration::from_secs(1)).await);
    assert!(common::eventually(Duration::from_millis(100), || gs.monitored_count() == 0).await);

    cluster.shut_down().await;
}
