use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::domain::vgs_system_model::communication::codec::WireCodec;
use crate::domain::vgs_system_model::communication::protocol::{Envelope, Payload, RemoteError, Reply, Request};
use crate::domain::vgs_system_model::grid_scheduler::grid_scheduler_trait::GridSchedulerApi;
use crate::domain::vgs_system_model::resource_manager::resource_manager_trait::ResourceManagerApi;
use crate::error::Result;

/// Turns decoded requests into calls on a local peer.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> String;

    async fn handle(&self, request: Request) -> Reply;
}

fn unsupported(endpoint: &str, request: &Request) -> Reply {
    Reply::Failed(RemoteError::Rejected(format!("{} does not handle {}", endpoint, request.kind())))
}

pub struct GridSchedulerEndpoint {
    name: String,
    gs: Arc<dyn GridSchedulerApi>,
}

impl GridSchedulerEndpoint {
    pub fn new(name: impl Into<String>, gs: Arc<dyn GridSchedulerApi>) -> Self {
        GridSchedulerEndpoint { name: name.into(), gs }
    }
}

#[async_trait]
impl Endpoint for GridSchedulerEndpoint {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn handle(&self, request: Request) -> Reply {
        let gs = &self.gs;

        match request {
            Request::Ping => Reply::answer(gs.ping().await, Reply::Heartbeat),
            Request::GetId => Reply::answer(gs.get_id().await, |id| Reply::Id(id.id)),
            Request::Start => Reply::answer(gs.start().await, |_| Reply::Done),
            Request::ShutDown => Reply::answer(gs.shut_down().await, |_| Reply::Done),
            Request::Monitor(monitor) => Reply::answer(gs.monitor(monitor).await, |_| Reply::Done),
            Request::BackUp(back_up) => Reply::answer(gs.back_up(back_up).await, |_| Reply::Done),
            Request::Promote(promotion) => Reply::answer(gs.promote(promotion).await, |_| Reply::Done),
            Request::OffLoad(job) => Reply::answer(gs.off_load(job).await, Reply::Placed),
            Request::ReleaseMonitored(monitor) => Reply::answer(gs.release_monitored(monitor).await, Reply::Released),
            Request::ReleaseBackUp(back_up) => Reply::answer(gs.release_back_up(back_up).await, Reply::Released),
            Request::ResourceManagerWakeUp(from) => Reply::answer(gs.receive_resource_manager_wake_up_announcement(from).await, |_| Reply::Done),
            Request::GridSchedulerWakeUp(from) => Reply::answer(gs.receive_grid_scheduler_wake_up_announcement(from).await, |_| Reply::Done),
            other @ (Request::OrderWork(_) | Request::Queue(_) | Request::Finish { .. }) => unsupported(&self.name, &other),
        }
    }
}

pub struct ResourceManagerEndpoint {
    name: String,
    rm: Arc<dyn ResourceManagerApi>,
}

impl ResourceManagerEndpoint {
    pub fn new(name: impl Into<String>, rm: Arc<dyn ResourceManagerApi>) -> Self {
        ResourceManagerEndpoint { name: name.into(), rm }
    }
}

#[async_trait]
impl Endpoint for ResourceManagerEndpoint {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn handle(&self, request: Request) -> Reply {
        let rm = &self.rm;

        match request {
            Request::Ping => Reply::answer(rm.ping().await, Reply::Heartbeat),
            Request::GetId => Reply::answer(rm.get_id().await, |id| Reply::Id(id.id)),
            Request::Start => Reply::answer(rm.start().await, |_| Reply::Done),
            Request::ShutDown => Reply::answer(rm.shut_down().await, |_| Reply::Done),
            Request::OrderWork(order) => Reply::answer(rm.order_work(order).await, |_| Reply::Done),
            Request::Queue(job) => Reply::answer(rm.queue(job).await, |_| Reply::Done),
            Request::Finish { node_id, job } => Reply::answer(rm.finish(node_id, job).await, Reply::Released),
            Request::GridSchedulerWakeUp(from) => Reply::answer(rm.receive_grid_scheduler_wake_up_announcement(from).await, |_| Reply::Done),
            other => unsupported(&self.name, &other),
        }
    }
}

/// Serves one local peer on a TCP listener until stopped or dropped.
///
/// Stopping also closes every open connection, so to its callers the peer looks crashed.
pub struct PeerServer {
    local_address: SocketAddr,
    token: CancellationToken,
    accept: JoinHandle<()>,
}

impl PeerServer {
    pub async fn bind(address: &str, endpoint: Arc<dyn Endpoint>) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_address = listener.local_addr()?;
        let token = CancellationToken::new();

        log::info!("[{}] Listening on {}", endpoint.name(), local_address);
        let accept = tokio::spawn(accept_loop(listener, endpoint, token.clone()));

        Ok(PeerServer { local_address, token, accept })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stops and waits until the listening socket is closed, so the address can be bound again.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.accept).await {
            log::warn!("Accept loop on {} ended abnormally: {}", self.local_address, e);
        }
    }
}

impl Drop for PeerServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_loop(listener: TcpListener, endpoint: Arc<dyn Endpoint>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    log::trace!("[{}] Connection from {}", endpoint.name(), remote);
                    tokio::spawn(serve_connection(stream, endpoint.clone(), token.child_token()));
                }
                Err(e) => log::warn!("[{}] Accept failed: {}", endpoint.name(), e),
            },
        }
    }

    log::debug!("[{}] Stopped listening", endpoint.name());
}

async fn serve_connection(stream: TcpStream, endpoint: Arc<dyn Endpoint>, token: CancellationToken) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("[{}] Could not disable Nagle: {}", endpoint.name(), e);
    }
    let mut framed = Framed::new(stream, WireCodec::<Envelope>::new());

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = framed.next() => next,
        };

        let envelope = match next {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                log::warn!("[{}] Dropping connection: {}", endpoint.name(), e);
                break;
            }
            None => break,
        };

        let Payload::Request(request) = &envelope.payload else {
            log::warn!("[{}] Ignoring a reply sent by {}", endpoint.name(), envelope.sender_id);
            continue;
        };

        let reply = tokio::select! {
            _ = token.cancelled() => break,
            reply = endpoint.handle(request.clone()) => reply,
        };

        if let Err(e) = framed.send(envelope.reply(reply)).await {
            log::debug!("[{}] Reply to {} was lost: {}", endpoint.name(), envelope.sender_id, e);
            break;
        }
    }
}
