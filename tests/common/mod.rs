#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use vgs_rust_scheduler::api::cluster_dto::{ClusterDto, Transport};

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Like `eventually`, for conditions that need to await.
pub async fn eventually_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// A small deployment with a fast prober.
pub fn cluster_dto(resource_managers: u32, grid_schedulers: u32, nodes: usize) -> ClusterDto {
    let mut dto = ClusterDto::generated(resource_managers, grid_schedulers, nodes);
    dto.probe_interval_ms = 20;
    dto
}

/// Like `cluster_dto`, but every peer listens on a free port of 127.0.0.1.
pub fn loopback_cluster_dto(resource_managers: u32, grid_schedulers: u32, nodes: usize) -> ClusterDto {
    let mut dto = cluster_dto(resource_managers, grid_schedulers, nodes);

    // Holding every listener until all ports are known keeps them distinct.
    let listeners: Vec<_> = (0..resource_managers + grid_schedulers).map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap()).collect();
    let mut ports = listeners.iter().map(|listener| listener.local_addr().unwrap().to_string());

    for peer in dto.resource_managers.iter_mut().chain(dto.grid_schedulers.iter_mut()) {
        peer.address = ports.next().unwrap();
    }

    dto.transport = Transport::Tcp;
    dto.call_timeout_ms = 500;
    dto
}
