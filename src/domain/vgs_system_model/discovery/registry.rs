use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::discovery::naming::Naming;
use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::domain::vgs_system_model::discovery::status::Status;
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::domain::vgs_system_model::utils::id::{GsTag, Id, RmTag};
use crate::error::Result;

pub type OfflineCallback<K> = Arc<dyn Fn(Id<K>) + Send + Sync>;

pub type RmRegistry = Registry<RmTag, dyn ResourceManagerApi>;
pub type GsRegistry = Registry<GsTag, dyn GridSchedulerApi>;

/// A reachable candidate found during one selection pass.
struct Candidate<K, T: ?Sized> {
    id: Id<K>,
    handle: Arc<T>,
    load: u64,
}

/// Maps the ids of one namespace to peer addresses and caches what is known about their liveness.
///
/// The table is fixed at construction; ids it does not cover have no entry, report
/// [`Status::Unknown`] and never take part in selection. Clones share the status cache and the
/// offline subscribers, so a prober and its owner always see the same picture.
pub struct Registry<K, T: ?Sized> {
    /// Short name of the namespace used in log lines ("RM" or "GS").
    name: &'static str,
    addresses: Arc<Vec<Option<String>>>,
    statuses: Arc<RwLock<Vec<Option<Status>>>>,
    naming: Arc<dyn Naming<T>>,
    offline_callbacks: Arc<RwLock<Vec<OfflineCallback<K>>>>,
    /// Serializes offline edges so concurrent failures of one peer fire subscribers once.
    transition: Arc<Mutex<()>>,
}

impl<K, T: ?Sized> Clone for Registry<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            addresses: self.addresses.clone(),
            statuses: self.statuses.clone(),
            naming: self.naming.clone(),
            offline_callbacks: self.offline_callbacks.clone(),
            transition: self.transition.clone(),
        }
    }
}

impl<K, T: ?Sized> std::fmt::Debug for Registry<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("name", &self.name).field("addresses", &self.addresses).finish()
    }
}

impl<K, T: ?Sized> Registry<K, T> {
    pub fn new(name: &'static str, urls: BTreeMap<u32, String>, naming: Arc<dyn Naming<T>>) -> Self {
        let n = urls.keys().max().map(|max| *max as usize + 1).unwrap_or(0);
        let mut addresses = vec![None; n];
        let mut statuses = vec![None; n];

        for (id, url) in urls {
            addresses[id as usize] = Some(url);
            statuses[id as usize] = Some(Status::Offline);
        }

        Self {
            name,
            addresses: Arc::new(addresses),
            statuses: Arc::new(RwLock::new(statuses)),
            naming,
            offline_callbacks: Arc::new(RwLock::new(Vec::new())),
            transition: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// All ids with a registered address, ascending.
    pub fn ids(&self) -> Vec<Id<K>> {
        self.addresses.iter().enumerate().filter(|(_, url)| url.is_some()).map(|(index, _)| Id::new(index as u32)).collect()
    }

    pub fn ids_except(&self, exclude: &[Id<K>]) -> Vec<Id<K>> {
        let exceptions: HashSet<u32> = exclude.iter().map(|id| id.id).collect();
        self.ids().into_iter().filter(|id| !exceptions.contains(&id.id)).collect()
    }

    pub fn contains(&self, id: Id<K>) -> bool {
        self.address(id).is_some()
    }

    pub fn address(&self, id: Id<K>) -> Option<&str> {
        self.addresses.get(id.index()).and_then(|url| url.as_deref())
    }

    pub fn status(&self, id: Id<K>) -> Status {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        statuses.get(id.index()).copied().flatten().unwrap_or(Status::Unknown)
    }

    /// Overwrites the cached status. Returns `false` (and changes nothing) for ids without entry.
    ///
    /// This never notifies offline subscribers; failures observed by probes go through
    /// [`Registry::report_failure`].
    pub fn set_status(&self, id: Id<K>, new_status: Status) -> bool {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);

        match statuses.get_mut(id.index()) {
            Some(Some(status)) => {
                *status = new_status;
                true
            }
            _ => false,
        }
    }

    /// Subscribes to ONLINE -> OFFLINE transitions. Callbacks run in registration order.
    pub fn on_offline<F>(&self, callback: F)
    where
        F: Fn(Id<K>) + Send + Sync + 'static,
    {
        let mut callbacks = self.offline_callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.push(Arc::new(callback));
    }

    /// Records a failed interaction with `id` and marks it OFFLINE.
    ///
    /// Subscribers fire only when the previous status was ONLINE, so a peer that keeps failing
    /// triggers them once per online streak. They run before the status flips, while `status(id)`
    /// still reads ONLINE, and must not report failures themselves. Returns whether this call was
    /// that transition.
    pub fn report_failure(&self, id: Id<K>) -> bool {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let was_online = match self.statuses.read().unwrap_or_else(PoisonError::into_inner).get(id.index()) {
            Some(Some(status)) => *status == Status::Online,
            _ => return false,
        };

        if was_online {
            tracing::warn!(registry = self.name, "[{} registry] {} {} went offline", self.name, self.name, id);

            let callbacks: Vec<OfflineCallback<K>> = self.offline_callbacks.read().unwrap_or_else(PoisonError::into_inner).clone();
            for callback in callbacks.iter() {
                callback(id);
            }
        }

        self.set_status(id, Status::Offline);
        was_online
    }

    /// Looks the peer up without touching the status cache.
    pub fn lookup(&self, id: Id<K>) -> Result<Arc<T>> {
        match self.address(id) {
            Some(url) => self.naming.lookup(url),
            None => Err(crate::error::Error::NoEntryForId(id.id)),
        }
    }

    /// Resolves a live handle for `id`. Reaching it marks it ONLINE, failing to reach it marks it OFFLINE.
    pub fn resolve(&self, id: Id<K>) -> Option<Arc<T>> {
        if !self.contains(id) {
            return None;
        }

        match self.lookup(id) {
            Ok(handle) => {
                self.set_status(id, Status::Online);
                Some(handle)
            }
            Err(e) => {
                log::debug!("[{} registry] Lookup of {} {} failed: {}", self.name, self.name, id, e);
                self.report_failure(id);
                None
            }
        }
    }
}

impl<K, T> Registry<K, T>
where
    K: Send + Sync + 'static,
    T: Addressable + ?Sized + 'static,
{
    /// Probes one peer: lookup plus ping. Updates the status cache either way.
    pub async fn probe(&self, id: Id<K>) -> Option<(Arc<T>, u64)> {
        let handle = match self.lookup(id) {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("[{} registry] Probe of {} {} failed: {}", self.name, self.name, id, e);
                self.report_failure(id);
                return None;
            }
        };

        match handle.ping().await {
            Ok(heartbeat) => {
                self.set_status(id, Status::Online);
                Some((handle, heartbeat.load))
            }
            Err(e) => {
                log::debug!("[{} registry] Probe of {} {} failed: {}", self.name, self.name, id, e);
                self.report_failure(id);
                None
            }
        }
    }

    /// Picks one peer out of `ids_except(exclude)` with `selector`, weighted by freshly probed
    /// loads, and applies `operation` to it.
    ///
    /// Candidates whose probe fails are dropped and marked OFFLINE. If the operation itself fails
    /// on the chosen peer, that peer is dropped too and the selector runs again over the rest.
    /// Returns `None` only when no candidate could be reached.
    pub async fn select_and_invoke<F, Fut, R>(&self, operation: F, selector: Selector, exclude: &[Id<K>]) -> Option<R>
    where
        F: Fn(Arc<T>, Id<K>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let probes = self.ids_except(exclude).into_iter().map(|id| async move {
            let (handle, load) = self.probe(id).await?;
            Some(Candidate { id, handle, load })
        });

        let mut survivors: Vec<Candidate<K, T>> = join_all(probes).await.into_iter().flatten().collect();

        while !survivors.is_empty() {
            let loads: Vec<u64> = survivors.iter().map(|candidate| candidate.load).collect();
            let picked = {
                let mut rng = rand::rng();
                selector.pick(&loads, &mut rng)
            };

            let Some(index) = picked else {
                break;
            };

            let candidate = survivors.remove(index);

            match operation(candidate.handle.clone(), candidate.id).await {
                Ok(result) => return Some(result),
                Err(e) => {
                    log::warn!("[{} registry] Invocation on {} {} failed: {}", self.name, self.name, candidate.id, e);
                    if e.is_peer_failure() {
                        self.report_failure(candidate.id);
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vgs_system_model::discovery::naming::LocalNaming;
    use crate::domain::vgs_system_model::model::requests::Heartbeat;
    use crate::domain::vgs_system_model::utils::id::RmId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct Peer {
        load: u64,
    }

    #[async_trait]
    impl Addressable for Peer {
        async fn ping(&self) -> Result<Heartbeat> {
            Ok(Heartbeat { load: self.load })
        }
    }

    fn registry(naming: Arc<LocalNaming<Peer>>) -> Registry<RmTag, Peer> {
        let urls = BTreeMap::from([(0, "rm-0".to_string()), (2, "rm-2".to_string())]);
        Registry::new("RM", urls, naming)
    }

    #[test]
    fn ids_outside_the_table_have_no_entry() {
        let registry = registry(Arc::new(LocalNaming::new()));

        assert_eq!(registry.ids(), vec![RmId::new(0), RmId::new(2)]);
        assert_eq!(registry.status(RmId::new(0)), Status::Offline);
        assert_eq!(registry.status(RmId::new(1)), Status::Unknown);
        assert_eq!(registry.status(RmId::new(7)), Status::Unknown);

        assert!(!registry.set_status(RmId::new(1), Status::Online));
        assert_eq!(registry.status(RmId::new(1)), Status::Unknown);
        assert!(matches!(registry.lookup(RmId::new(1)), Err(crate::error::Error::NoEntryForId(1))));
    }

    #[test]
    #[traced_test]
    fn offline_subscribers_fire_once_per_online_streak() {
        let registry = registry(Arc::new(LocalNaming::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        registry.on_offline(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!registry.report_failure(RmId::new(0)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry.set_status(RmId::new(0), Status::Online);
        assert!(registry.report_failure(RmId::new(0)));
        assert!(!registry.report_failure(RmId::new(0)));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status(RmId::new(0)), Status::Offline);
        assert!(logs_contain("went offline"));
    }

    #[tokio::test]
    async fn selection_skips_unreachable_and_excluded_peers() {
        let naming = Arc::new(LocalNaming::new());
        naming.bind("rm-2", Arc::new(Peer { load: 3 })).unwrap();
        let registry = registry(naming.clone());

        let picked = registry.select_and_invoke(|_, id| async move { Ok(id) }, Selector::LowestLoad, &[]).await;
        assert_eq!(picked, Some(RmId::new(2)));
        assert_eq!(registry.status(RmId::new(2)), Status::Online);
        assert_eq!(registry.status(RmId::new(0)), Status::Offline);

        let picked = registry.select_and_invoke(|_, id| async move { Ok(id) }, Selector::LowestLoad, &[RmId::new(2)]).await;
        assert_eq!(picked, None);
    }

    #[tokio::test]
    async fn failed_invocation_falls_through_to_the_next_candidate() {
        let naming = Arc::new(LocalNaming::new());
        naming.bind("rm-0", Arc::new(Peer { load: 0 })).unwrap();
        naming.bind("rm-2", Arc::new(Peer { load: 50 })).unwrap();
        let registry = registry(naming);

        let picked = registry
            .select_and_invoke(
                |_, id| async move {
                    if id == RmId::new(0) { Err(crate::error::Error::InstanceOffline("RM 0".to_string())) } else { Ok(id) }
                },
                Selector::LowestLoad,
                &[],
            )
            .await;

        assert_eq!(picked, Some(RmId::new(2)));
        assert_eq!(registry.status(RmId::new(0)), Status::Offline);
    }

    #[test]
    fn subscribers_still_see_the_peer_online() {
        let registry = registry(Arc::new(LocalNaming::new()));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let observer = registry.clone();
        let log = seen.clone();
        registry.on_offline(move |id| {
            log.lock().unwrap().push(observer.status(id));
        });

        registry.set_status(RmId::new(2), Status::Online);
        assert!(registry.report_failure(RmId::new(2)));

        assert_eq!(*seen.lock().unwrap(), vec![Status::Online]);
        assert_eq!(registry.status(RmId::new(2)), Status::Offline);
    }

    #[tokio::test]
    async fn lowest_load_keeps_id_order_after_a_failed_invocation() {
        let naming = Arc::new(LocalNaming::new());
        let urls: BTreeMap<u32, String> = (0..4).map(|id| (id, format!("rm-{}", id))).collect();
        for address in urls.values() {
            naming.bind(address.clone(), Arc::new(Peer { load: 1 })).unwrap();
        }
        let registry: Registry<RmTag, Peer> = Registry::new("RM", urls, naming);

        let picked = registry
            .select_and_invoke(
                |_, id| async move {
                    if id == RmId::new(0) { Err(crate::error::Error::InstanceOffline("RM 0".to_string())) } else { Ok(id) }
                },
                Selector::LowestLoad,
                &[],
            )
            .await;

        assert_eq!(picked, Some(RmId::new(1)));
    }
}
