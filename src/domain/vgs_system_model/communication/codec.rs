use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound for one frame. Every protocol message is a few hundred bytes at most.
const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Length-prefixed bincode frames carrying values of type `T`.
///
/// Oversized and undecodable frames surface as `io::ErrorKind::InvalidData`.
pub struct WireCodec<T> {
    framing: LengthDelimitedCodec,
    _message: PhantomData<fn() -> T>,
}

impl<T> WireCodec<T> {
    pub fn new() -> Self {
        Self { framing: LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_LENGTH).new_codec(), _message: PhantomData }
    }
}

impl<T> Default for WireCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl<T: Serialize> Encoder<T> for WireCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&item).map_err(invalid)?;
        self.framing.encode(Bytes::from(body), dst).map_err(|e| if e.kind() == io::ErrorKind::InvalidInput { invalid(e) } else { e })
    }
}

impl<T: DeserializeOwned> Decoder for WireCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, Self::Error> {
        let Some(body) = self.framing.decode(src)? else {
            return Ok(None);
        };

        bincode::deserialize(&body).map(Some).map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vgs_system_model::communication::protocol::{Envelope, Payload, Reply, Request};
    use crate::domain::vgs_system_model::model::job::Job;
    use crate::domain::vgs_system_model::model::requests::MonitoringRequest;
    use crate::domain::vgs_system_model::model::work_request::{Source, WorkRequest};
    use crate::domain::vgs_system_model::utils::id::{JobId, RmId};
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    #[tokio::test]
    async fn a_request_and_its_reply_cross_a_framed_stream() {
        let (left, right) = tokio::io::duplex(1024);
        let mut caller = Framed::new(left, WireCodec::<Envelope>::new());
        let mut callee = Framed::new(right, WireCodec::<Envelope>::new());

        let job = Job::new(JobId::new(5), 12).assigned_to(RmId::new(2));
        let request = MonitoringRequest::new(RmId::new(2), WorkRequest::new(job, Source::ResourceManager(RmId::new(2))));
        caller.send(Envelope::request("rm-2", "gs-0", Request::Monitor(request))).await.unwrap();

        let received = callee.next().await.unwrap().unwrap();
        assert_eq!(received.target_id, "gs-0");
        match &received.payload {
            Payload::Request(Request::Monitor(monitor)) => assert_eq!(monitor.work_request.job, job),
            other => panic!("unexpected payload {:?}", other),
        }

        callee.send(received.reply(Reply::Done)).await.unwrap();
        let answer = caller.next().await.unwrap().unwrap();
        assert_eq!(answer.target_id, "rm-2");
        assert!(matches!(answer.payload, Payload::Reply(Reply::Done)));
    }

    #[test]
    fn garbage_frames_are_invalid_data() {
        let mut codec = WireCodec::<Envelope>::new();
        let mut framed = BytesMut::new();
        LengthDelimitedCodec::new().encode(Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0xff]), &mut framed).unwrap();

        let error = codec.decode(&mut framed).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frames_are_refused() {
        let mut codec = WireCodec::<Envelope>::new();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&((MAX_FRAME_LENGTH as u32) + 1).to_be_bytes());

        assert_eq!(codec.decode(&mut buffer).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = WireCodec::<Envelope>::new();
        let mut buffer = BytesMut::new();
        codec.encode(Envelope::request("a", "b", Request::Queue(Job::new(JobId::new(1), 1))), &mut buffer).unwrap();

        let mut partial = buffer.split_to(buffer.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }
}
