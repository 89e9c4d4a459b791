use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::api::cluster_dto::{ClusterDto, Transport};
use crate::domain::simulator::simulator::{SharedSimulator, Simulator};
use crate::domain::vgs_system_model::client::client::{Client, JobResultHandler};
use crate::domain::vgs_system_model::communication::remote::TcpNaming;
use crate::domain::vgs_system_model::communication::server::{Endpoint, GridSchedulerEndpoint, PeerServer, ResourceManagerEndpoint};
use crate::domain::vgs_system_model::discovery::naming::{LocalNaming, Naming};
use crate::domain::vgs_system_model::discovery::registry::{GsRegistry, RmRegistry};
use crate::domain::vgs_system_model::discovery::selector::Selector;
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler::GridScheduler;
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use crate::domain::vgs_system_model::resource_manager::eager_resource_manager::EagerResourceManager;
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::domain::vgs_system_model::utils::id::{ClientId, GsId, RmId};
use crate::domain::vgs_system_model::utils::statistics;
use crate::error::{Error, Result};

/// How the peers of a [`LocalCluster`] find each other.
enum Wiring {
    Local { rm_naming: Arc<LocalNaming<dyn ResourceManagerApi>>, gs_naming: Arc<LocalNaming<dyn GridSchedulerApi>> },
    Tcp { naming: Arc<TcpNaming>, servers: Mutex<BTreeMap<String, PeerServer>> },
}

impl Wiring {
    fn new(dto: &ClusterDto) -> Self {
        match dto.transport {
            Transport::Local => Wiring::Local { rm_naming: Arc::new(LocalNaming::new()), gs_naming: Arc::new(LocalNaming::new()) },
            Transport::Tcp => Wiring::Tcp {
                naming: Arc::new(TcpNaming::new("cluster", Duration::from_millis(dto.call_timeout_ms))),
                servers: Mutex::new(BTreeMap::new()),
            },
        }
    }

    fn rm_naming(&self) -> Arc<dyn Naming<dyn ResourceManagerApi>> {
        match self {
            Wiring::Local { rm_naming, .. } => rm_naming.clone() as Arc<dyn Naming<dyn ResourceManagerApi>>,
            Wiring::Tcp { naming, .. } => naming.clone() as Arc<dyn Naming<dyn ResourceManagerApi>>,
        }
    }

    fn gs_naming(&self) -> Arc<dyn Naming<dyn GridSchedulerApi>> {
        match self {
            Wiring::Local { gs_naming, .. } => gs_naming.clone() as Arc<dyn Naming<dyn GridSchedulerApi>>,
            Wiring::Tcp { naming, .. } => naming.clone() as Arc<dyn Naming<dyn GridSchedulerApi>>,
        }
    }

    async fn expose_resource_manager(&self, address: &str, rm: &EagerResourceManager, fresh: bool) -> Result<()> {
        match self {
            Wiring::Local { rm_naming, .. } if fresh => rm_naming.bind(address, Arc::new(rm.clone())),
            Wiring::Local { rm_naming, .. } => {
                rm_naming.rebind(address, Arc::new(rm.clone()));
                Ok(())
            }
            Wiring::Tcp { .. } => {
                let name = format!("RM {}", rm.id());
                self.serve(address, Arc::new(ResourceManagerEndpoint::new(name, Arc::new(rm.clone())))).await
            }
        }
    }

    async fn expose_grid_scheduler(&self, address: &str, gs: &GridScheduler, fresh: bool) -> Result<()> {
        match self {
            Wiring::Local { gs_naming, .. } if fresh => gs_naming.bind(address, Arc::new(gs.clone())),
            Wiring::Local { gs_naming, .. } => {
                gs_naming.rebind(address, Arc::new(gs.clone()));
                Ok(())
            }
            Wiring::Tcp { .. } => {
                let name = format!("GS {}", gs.id());
                self.serve(address, Arc::new(GridSchedulerEndpoint::new(name, Arc::new(gs.clone())))).await
            }
        }
    }

    async fn serve(&self, address: &str, endpoint: Arc<dyn Endpoint>) -> Result<()> {
        let Wiring::Tcp { servers, .. } = self else {
            return Ok(());
        };

        let server = PeerServer::bind(address, endpoint).await?;
        if let Some(previous) = servers.lock().unwrap_or_else(PoisonError::into_inner).insert(address.to_string(), server) {
            previous.stop();
        }
        Ok(())
    }

    /// Makes `address` unreachable for every later call.
    async fn withdraw(&self, address: &str) {
        match self {
            Wiring::Local { rm_naming, gs_naming } => {
                rm_naming.unbind(address);
                gs_naming.unbind(address);
            }
            Wiring::Tcp { servers, .. } => {
                let server = servers.lock().unwrap_or_else(PoisonError::into_inner).remove(address);
                if let Some(server) = server {
                    server.close().await;
                }
            }
        }
    }
}

/// Every GS and RM of one deployment running inside this process.
///
/// Peers reach each other only through naming, either an in-process directory or TCP
/// listeners, so withdrawing an address is indistinguishable from the process behind it
/// crashing. Each component gets registries of its own; they share the address tables but not
/// the status caches.
pub struct LocalCluster {
    wiring: Wiring,
    rm_urls: BTreeMap<u32, String>,
    gs_urls: BTreeMap<u32, String>,
    resource_managers: BTreeMap<RmId, EagerResourceManager>,
    grid_schedulers: BTreeMap<GsId, GridScheduler>,
    selector: Selector,
    simulator: SharedSimulator,
}

impl LocalCluster {
    /// Spawns, binds and starts every peer described by `dto`. Grid schedulers start first so the
    /// resource managers' wake-up announcements find them running.
    pub async fn launch(dto: &ClusterDto, result_handler: Arc<dyn JobResultHandler>) -> Result<Self> {
        dto.validate()?;

        if let Some(file) = &dto.statistics_file {
            statistics::init_global(Some(file.clone()))?;
        }

        let mut cluster = LocalCluster {
            wiring: Wiring::new(dto),
            rm_urls: dto.rm_urls()?,
            gs_urls: dto.gs_urls()?,
            resource_managers: BTreeMap::new(),
            grid_schedulers: BTreeMap::new(),
            selector: dto.selector,
            simulator: Simulator::shared(dto.time_unit_ms),
        };

        let probe_interval = Duration::from_millis(dto.probe_interval_ms);

        for (id, address) in cluster.gs_urls.clone() {
            let gs_id = GsId::new(id);
            let gs = GridScheduler::spawn(gs_id, cluster.rm_registry(), cluster.gs_registry(), probe_interval, cluster.selector);
            cluster.wiring.expose_grid_scheduler(&address, &gs, true).await?;
            cluster.grid_schedulers.insert(gs_id, gs);
        }

        for (id, address) in cluster.rm_urls.clone() {
            let rm_id = RmId::new(id);
            let rm = EagerResourceManager::spawn(rm_id, dto.nodes_per_resource_manager, cluster.gs_registry(), result_handler.clone(), cluster.simulator.clone())
                .with_selector(cluster.selector);
            cluster.wiring.expose_resource_manager(&address, &rm, true).await?;
            cluster.resource_managers.insert(rm_id, rm);
        }

        for gs in cluster.grid_schedulers.values() {
            gs.start().await?;
        }
        for rm in cluster.resource_managers.values() {
            rm.start().await?;
        }

        log::info!(
            "Local cluster up: {} grid schedulers, {} resource managers with {} nodes each",
            cluster.grid_schedulers.len(),
            cluster.resource_managers.len(),
            dto.nodes_per_resource_manager
        );

        Ok(cluster)
    }

    /// A fresh registry over the RM table, with its own status cache.
    pub fn rm_registry(&self) -> RmRegistry {
        RmRegistry::new("RM", self.rm_urls.clone(), self.wiring.rm_naming())
    }

    pub fn gs_registry(&self) -> GsRegistry {
        GsRegistry::new("GS", self.gs_urls.clone(), self.wiring.gs_naming())
    }

    pub fn client(&self, id: ClientId) -> Client {
        Client::new(id, self.gs_registry(), self.selector)
    }

    pub fn simulator(&self) -> SharedSimulator {
        self.simulator.clone()
    }

    pub fn grid_scheduler(&self, id: GsId) -> Option<&GridScheduler> {
        self.grid_schedulers.get(&id)
    }

    pub fn resource_manager(&self, id: RmId) -> Option<&EagerResourceManager> {
        self.resource_managers.get(&id)
    }

    pub fn grid_scheduler_ids(&self) -> Vec<GsId> {
        self.grid_schedulers.keys().copied().collect()
    }

    pub fn resource_manager_ids(&self) -> Vec<RmId> {
        self.resource_managers.keys().copied().collect()
    }

    /// Makes the RM unreachable and drops everything it was running.
    pub async fn crash_resource_manager(&self, id: RmId) -> Result<()> {
        let rm = self.resource_managers.get(&id).ok_or(Error::NoEntryForId(id.id))?;

        if let Some(address) = self.rm_urls.get(&id.id) {
            self.wiring.withdraw(address).await;
        }
        rm.shut_down().await?;

        log::warn!("RM {} crashed", id);
        Ok(())
    }

    /// Rebinds a crashed RM and starts it with empty state.
    pub async fn restart_resource_manager(&self, id: RmId) -> Result<()> {
        let rm = self.resource_managers.get(&id).ok_or(Error::NoEntryForId(id.id))?;

        if let Some(address) = self.rm_urls.get(&id.id) {
            self.wiring.expose_resource_manager(address, rm, false).await?;
        }
        rm.start().await
    }

    pub async fn crash_grid_scheduler(&self, id: GsId) -> Result<()> {
        let gs = self.grid_schedulers.get(&id).ok_or(Error::NoEntryForId(id.id))?;

        if let Some(address) = self.gs_urls.get(&id.id) {
            self.wiring.withdraw(address).await;
        }
        gs.shut_down().await?;

        log::warn!("GS {} crashed", id);
        Ok(())
    }

    pub async fn restart_grid_scheduler(&self, id: GsId) -> Result<()> {
        let gs = self.grid_schedulers.get(&id).ok_or(Error::NoEntryForId(id.id))?;

        if let Some(address) = self.gs_urls.get(&id.id) {
            self.wiring.expose_grid_scheduler(address, gs, false).await?;
        }
        gs.start().await
    }

    /// Stops every peer. Individual peers can be brought back with the restart methods.
    pub async fn shut_down(&self) {
        let schedulers = self.grid_schedulers.values().map(|gs| gs.shut_down());
        let managers = self.resource_managers.values().map(|rm| rm.shut_down());

        for outcome in join_all(schedulers).await.into_iter().chain(join_all(managers).await) {
            if let Err(e) = outcome {
                log::warn!("Shutdown failed: {}", e);
            }
        }

        if let Wiring::Tcp { servers, .. } = &self.wiring {
            for server in servers.lock().unwrap_or_else(PoisonError::into_inner).values() {
                server.stop();
            }
        }

        statistics::flush_global();
        log::info!("Local cluster shut down");
    }
}
