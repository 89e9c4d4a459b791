use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::domain::vgs_system_model::communication::codec::WireCodec;
use crate::domain::vgs_system_model::communication::protocol::{Envelope, Payload, Reply, Request};
use crate::domain::vgs_system_model::discovery::addressable::Addressable;
use crate::domain::vgs_system_model::discovery::naming::Naming;
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{BackUpRequest, Heartbeat, MonitoringRequest, PromotionRequest, WorkOrder};
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::domain::vgs_system_model::utils::id::{GsId, NodeId, RmId};
use crate::error::{Error, Result};

/// The caller side of one peer address.
///
/// Every call opens a connection, sends a single request and waits for its reply. Anything that
/// goes wrong before a reply arrives counts as the peer being unreachable.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    address: String,
    sender: String,
    timeout: Duration,
}

impl RemotePeer {
    pub fn new(address: impl Into<String>, sender: impl Into<String>, timeout: Duration) -> Self {
        RemotePeer { address: address.into(), sender: sender.into(), timeout }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn call(&self, request: Request) -> Result<Reply> {
        let kind = request.kind();

        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => Err(Error::CodecError(format!("{} to {}: {}", kind, self.address, e))),
            Ok(Err(e)) => {
                log::debug!("[{}] {} to {} failed: {}", self.sender, kind, self.address, e);
                Err(Error::unreachable(&self.address))
            }
            Err(_) => {
                log::debug!("[{}] {} to {} timed out", self.sender, kind, self.address);
                Err(Error::unreachable(&self.address))
            }
        }
    }

    async fn exchange(&self, request: Request) -> io::Result<Reply> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, WireCodec::<Envelope>::new());

        framed.send(Envelope::request(&self.sender, &self.address, request)).await?;

        match framed.next().await {
            Some(Ok(Envelope { payload: Payload::Reply(reply), .. })) => Ok(reply),
            Some(Ok(_)) => Err(io::Error::new(io::ErrorKind::InvalidData, "peer answered with a request")),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before the reply")),
        }
    }
}

/// A grid scheduler in another process.
#[derive(Debug, Clone)]
pub struct RemoteGridScheduler {
    peer: RemotePeer,
}

impl RemoteGridScheduler {
    pub fn new(peer: RemotePeer) -> Self {
        RemoteGridScheduler { peer }
    }
}

#[async_trait]
impl Addressable for RemoteGridScheduler {
    async fn ping(&self) -> Result<Heartbeat> {
        self.peer.call(Request::Ping).await?.into_heartbeat()
    }
}

#[async_trait]
impl GridSchedulerApi for RemoteGridScheduler {
    async fn monitor(&self, request: MonitoringRequest) -> Result<()> {
        self.peer.call(Request::Monitor(request)).await?.into_done()
    }

    async fn back_up(&self, request: BackUpRequest) -> Result<()> {
        self.peer.call(Request::BackUp(request)).await?.into_done()
    }

    async fn promote(&self, request: PromotionRequest) -> Result<()> {
        self.peer.call(Request::Promote(request)).await?.into_done()
    }

    async fn off_load(&self, job: Job) -> Result<RmId> {
        self.peer.call(Request::OffLoad(job)).await?.into_placed()
    }

    async fn release_monitored(&self, request: MonitoringRequest) -> Result<bool> {
        self.peer.call(Request::ReleaseMonitored(request)).await?.into_released()
    }

    async fn release_back_up(&self, request: BackUpRequest) -> Result<bool> {
        self.peer.call(Request::ReleaseBackUp(request)).await?.into_released()
    }

    async fn receive_resource_manager_wake_up_announcement(&self, from: RmId) -> Result<()> {
        self.peer.call(Request::ResourceManagerWakeUp(from)).await?.into_done()
    }

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()> {
        self.peer.call(Request::GridSchedulerWakeUp(from)).await?.into_done()
    }

    async fn get_id(&self) -> Result<GsId> {
        Ok(GsId::new(self.peer.call(Request::GetId).await?.into_id()?))
    }

    async fn start(&self) -> Result<()> {
        self.peer.call(Request::Start).await?.into_done()
    }

    async fn shut_down(&self) -> Result<()> {
        self.peer.call(Request::ShutDown).await?.into_done()
    }
}

/// A resource manager in another process.
#[derive(Debug, Clone)]
pub struct RemoteResourceManager {
    peer: RemotePeer,
}

impl RemoteResourceManager {
    pub fn new(peer: RemotePeer) -> Self {
        RemoteResourceManager { peer }
    }
}

#[async_trait]
impl Addressable for RemoteResourceManager {
    async fn ping(&self) -> Result<Heartbeat> {
        self.peer.call(Request::Ping).await?.into_heartbeat()
    }
}

#[async_trait]
impl ResourceManagerApi for RemoteResourceManager {
    async fn order_work(&self, order: WorkOrder) -> Result<()> {
        self.peer.call(Request::OrderWork(order)).await?.into_done()
    }

    async fn queue(&self, job: Job) -> Result<()> {
        self.peer.call(Request::Queue(job)).await?.into_done()
    }

    async fn finish(&self, node_id: NodeId, job: Job) -> Result<bool> {
        self.peer.call(Request::Finish { node_id, job }).await?.into_released()
    }

    async fn receive_grid_scheduler_wake_up_announcement(&self, from: GsId) -> Result<()> {
        self.peer.call(Request::GridSchedulerWakeUp(from)).await?.into_done()
    }

    async fn get_id(&self) -> Result<RmId> {
        Ok(RmId::new(self.peer.call(Request::GetId).await?.into_id()?))
    }

    async fn start(&self) -> Result<()> {
        self.peer.call(Request::Start).await?.into_done()
    }

    async fn shut_down(&self) -> Result<()> {
        self.peer.call(Request::ShutDown).await?.into_done()
    }
}

/// Naming over TCP: an address is a `host:port` a [`PeerServer`] listens on.
///
/// Lookups never touch the network; a dead address shows up on the first call.
///
/// [`PeerServer`]: crate::domain::vgs_system_model::communication::server::PeerServer
#[derive(Debug, Clone)]
pub struct TcpNaming {
    sender: String,
    timeout: Duration,
}

impl TcpNaming {
    /// `sender` names the local side in envelopes; `timeout` bounds every call.
    pub fn new(sender: impl Into<String>, timeout: Duration) -> Self {
        TcpNaming { sender: sender.into(), timeout }
    }

    fn peer(&self, address: &str) -> RemotePeer {
        RemotePeer::new(address, self.sender.clone(), self.timeout)
    }
}

impl Naming<dyn GridSchedulerApi> for TcpNaming {
    fn lookup(&self, address: &str) -> Result<Arc<dyn GridSchedulerApi>> {
        Ok(Arc::new(RemoteGridScheduler::new(self.peer(address))))
    }
}

impl Naming<dyn ResourceManagerApi> for TcpNaming {
    fn lookup(&self, address: &str) -> Result<Arc<dyn ResourceManagerApi>> {
        Ok(Arc::new(RemoteResourceManager::new(self.peer(address))))
    }
}
