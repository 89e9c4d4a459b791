use serde::{Deserialize, Serialize};

use crate::domain::vgs_system_model::model::job::Job;
use crate::domain::vgs_system_model::model::requests::{BackUpRequest, Heartbeat, MonitoringRequest, PromotionRequest, WorkOrder};
use crate::domain::vgs_system_model::utils::id::{GsId, NodeId, RmId};
use crate::error::Error;

/// One call against a remote grid scheduler or resource manager.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Request {
    Ping,
    GetId,
    Start,
    ShutDown,

    Monitor(MonitoringRequest),
    BackUp(BackUpRequest),
    Promote(PromotionRequest),
    OffLoad(Job),
    ReleaseMonitored(MonitoringRequest),
    ReleaseBackUp(BackUpRequest),
    ResourceManagerWakeUp(RmId),

    /// Accepted by both peer kinds.
    GridSchedulerWakeUp(GsId),

    OrderWork(WorkOrder),
    Queue(Job),
    Finish { node_id: NodeId, job: Job },
}

impl Request {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::GetId => "GetId",
            Request::Start => "Start",
            Request::ShutDown => "ShutDown",
            Request::Monitor(_) => "Monitor",
            Request::BackUp(_) => "BackUp",
            Request::Promote(_) => "Promote",
            Request::OffLoad(_) => "OffLoad",
            Request::ReleaseMonitored(_) => "ReleaseMonitored",
            Request::ReleaseBackUp(_) => "ReleaseBackUp",
            Request::ResourceManagerWakeUp(_) => "ResourceManagerWakeUp",
            Request::GridSchedulerWakeUp(_) => "GridSchedulerWakeUp",
            Request::OrderWork(_) => "OrderWork",
            Request::Queue(_) => "Queue",
            Request::Finish { .. } => "Finish",
        }
    }
}

/// The failures a peer reports back over the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Offline(String),
    NoCapacity(String),
    Rejected(String),
}

impl From<&Error> for RemoteError {
    fn from(e: &Error) -> Self {
        match e {
            Error::InstanceOffline(who) => RemoteError::Offline(who.clone()),
            Error::NoCapacityAvailable(reason) => RemoteError::NoCapacity(reason.clone()),
            // A peer that failed to reach a third party is itself alive.
            other => RemoteError::Rejected(other.to_string()),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Offline(who) => Error::InstanceOffline(who),
            RemoteError::NoCapacity(reason) => Error::NoCapacityAvailable(reason),
            RemoteError::Rejected(reason) => Error::Rejected(reason),
        }
    }
}

/// The answer to exactly one [`Request`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Heartbeat(Heartbeat),
    Id(u32),
    Placed(RmId),
    Released(bool),
    Failed(RemoteError),
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Done => "Done",
            Reply::Heartbeat(_) => "Heartbeat",
            Reply::Id(_) => "Id",
            Reply::Placed(_) => "Placed",
            Reply::Released(_) => "Released",
            Reply::Failed(_) => "Failed",
        }
    }

    /// Turns a local outcome into a reply, wrapping the success value with `wrap`.
    pub fn answer<T>(outcome: crate::error::Result<T>, wrap: impl FnOnce(T) -> Reply) -> Reply {
        match outcome {
            Ok(value) => wrap(value),
            Err(e) => Reply::Failed(RemoteError::from(&e)),
        }
    }

    pub fn into_done(self) -> crate::error::Result<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_heartbeat(self) -> crate::error::Result<Heartbeat> {
        match self {
            Reply::Heartbeat(heartbeat) => Ok(heartbeat),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_id(self) -> crate::error::Result<u32> {
        match self {
            Reply::Id(id) => Ok(id),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_placed(self) -> crate::error::Result<RmId> {
        match self {
            Reply::Placed(rm_id) => Ok(rm_id),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_released(self) -> crate::error::Result<bool> {
        match self {
            Reply::Released(released) => Ok(released),
            other => Err(other.unexpected()),
        }
    }

    fn unexpected(self) -> Error {
        match self {
            Reply::Failed(e) => e.into(),
            other => Error::CodecError(format!("unexpected reply {}", other.kind())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Payload {
    Request(Request),
    Reply(Reply),
}

/// The wrapper ensuring routing information accompanies every message.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Envelope {
    pub target_id: String,
    pub sender_id: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn request(sender_id: impl Into<String>, target_id: impl Into<String>, request: Request) -> Self {
        Envelope { target_id: target_id.into(), sender_id: sender_id.into(), payload: Payload::Request(request) }
    }

    /// Answers this envelope, swapping sender and target.
    pub fn reply(&self, reply: Reply) -> Self {
        Envelope { target_id: self.sender_id.clone(), sender_id: self.target_id.clone(), payload: Payload::Reply(reply) }
    }
}
