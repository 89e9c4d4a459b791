use futures::future::join_all;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::discovery::registry::Registry;

/// Background liveness prober for one registry.
///
/// Every `interval` it probes all registered ids concurrently. Each probe is bounded by the
/// interval itself, so a hung peer delays nobody but its own result. Status changes and offline
/// notifications are handled by the registry.
pub struct Pinger<K, T: ?Sized> {
    registry: Registry<K, T>,
    interval: Duration,
    token: Mutex<Option<CancellationToken>>,
}

impl<K, T> Pinger<K, T>
where
    K: Send + Sync + 'static,
    T: Addressable + ?Sized + 'static,
{
    pub fn new(registry: Registry<K, T>, interval: Duration) -> Self {
        Self { registry, interval, token: Mutex::new(None) }
    }

    /// Starts the probe loop. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let registry = self.registry.clone();
        let interval = self.interval;
        let stop = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => probe_all(&registry, interval).await,
                }
            }

            log::debug!("[{} pinger] Stopped", registry.name());
        });

        *token = Some(cancel);
    }

    pub fn stop(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = token.take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Runs a single probe round right now, independent of the background loop.
    pub async fn probe_once(&self) {
        probe_all(&self.registry, self.interval).await;
    }
}

impl<K, T: ?Sized> Drop for Pinger<K, T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.token.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            cancel.cancel();
        }
    }
}

async fn probe_all<K, T>(registry: &Registry<K, T>, timeout: Duration)
where
    K: Send + Sync + 'static,
    T: Addressable + ?Sized + 'static,
{
    let probes = registry.ids().into_iter().map(|id| async move {
        if tokio::time::timeout(timeout, registry.probe(id)).await.is_err() {
            log::debug!("[{} pinger] Probe of {} {} timed out", registry.name(), registry.name(), id);
            registry.report_failure(id);
        }
    });

    join_all(probes).await;
}
