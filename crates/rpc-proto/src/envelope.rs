//! Wire envelope codec.
//!
//! A request is a 3-frame multipart message: `[request_id, method_utf8, kwargs_msgpack]`.
//! A response is a 4-frame multipart message: `[client_id, request_id, kind_msgpack, content_msgpack]`.
//! Identity frames prepended/stripped by the ROUTER/DEALER sockets are never
//! produced by this codec; callers strip or prepend them at the transport edge.

use bytes::Bytes;
use rmpv::Value;
use uuid::Uuid;

use crate::error::RpcError;

/// Response/request outcome discriminant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Done = 1,
    Update = 2,
    Error = 3,
    Heartbeat = 4,
    Ready = 5,
}

impl Kind {
    pub fn from_u8(value: u8) -> Result<Self, RpcError> {
        match value {
            1 => Ok(Kind::Done),
            2 => Ok(Kind::Update),
            3 => Ok(Kind::Error),
            4 => Ok(Kind::Heartbeat),
            5 => Ok(Kind::Ready),
            other => Err(RpcError::InvalidFrame(format!("unknown kind code {other}"))),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Any receiver must check this before attempting request-id correlation.
    pub fn is_heartbeat(self) -> bool {
        matches!(self, Kind::Heartbeat)
    }

    /// DONE or ERROR mark a request terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Kind::Done | Kind::Error)
    }
}

/// Opaque per-client identifier. Carried as a raw ZMQ identity frame; never parsed.
pub type ClientId = Bytes;

/// A decoded client request, minus `reply_channel` which is worker-local and
/// never transmitted.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: Uuid,
    pub method: String,
    pub kwargs: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, kwargs: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            kwargs,
        }
    }

    /// Encode as the 3-frame client→broker wire layout.
    pub fn encode(&self) -> Result<Vec<Bytes>, RpcError> {
        let kwargs_bytes = rmp_serde::to_vec_named(&self.kwargs)?;
        Ok(vec![
            Bytes::copy_from_slice(self.request_id.as_bytes()),
            Bytes::copy_from_slice(self.method.as_bytes()),
            Bytes::from(kwargs_bytes),
        ])
    }

    /// Decode the 3-frame client→broker wire layout.
    pub fn decode(frames: &[Bytes]) -> Result<Self, RpcError> {
        if frames.len() != 3 {
            return Err(RpcError::InvalidFrame(format!(
                "expected 3 request frames, got {}",
                frames.len()
            )));
        }
        let request_id = Uuid::from_slice(&frames[0])
            .map_err(|e| RpcError::InvalidFrame(format!("bad request_id: {e}")))?;
        let method = std::str::from_utf8(&frames[1])
            .map_err(|e| RpcError::InvalidFrame(format!("bad method utf8: {e}")))?
            .to_string();
        let kwargs: Value = rmp_serde::from_slice(&frames[2])?;
        Ok(Self {
            request_id,
            method,
            kwargs,
        })
    }
}

/// The frame layout a worker's DEALER socket actually receives once ZMQ has
/// stripped the `worker_id` ROUTER-routing frame the broker prepended: the
/// broker sends `[worker_id, client_id, request_id, method_utf8,
/// kwargs_msgpack]`; the worker sees the last four.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub client_id: ClientId,
    pub request_id: Uuid,
    pub method: String,
    pub kwargs: Value,
}

impl WorkerRequest {
    /// Encode the 4-frame payload the broker sends *after* its own
    /// ROUTER-routing `worker_id` frame (callers prepend that separately).
    pub fn encode(&self) -> Result<Vec<Bytes>, RpcError> {
        let kwargs_bytes = rmp_serde::to_vec_named(&self.kwargs)?;
        Ok(vec![
            self.client_id.clone(),
            Bytes::copy_from_slice(self.request_id.as_bytes()),
            Bytes::copy_from_slice(self.method.as_bytes()),
            Bytes::from(kwargs_bytes),
        ])
    }

    pub fn decode(frames: &[Bytes]) -> Result<Self, RpcError> {
        if frames.len() != 4 {
            return Err(RpcError::InvalidFrame(format!(
                "expected 4 worker-request frames, got {}",
                frames.len()
            )));
        }
        let client_id = frames[0].clone();
        let request_id = Uuid::from_slice(&frames[1])
            .map_err(|e| RpcError::InvalidFrame(format!("bad request_id: {e}")))?;
        let method = std::str::from_utf8(&frames[2])
            .map_err(|e| RpcError::InvalidFrame(format!("bad method utf8: {e}")))?
            .to_string();
        let kwargs: Value = rmp_serde::from_slice(&frames[3])?;
        Ok(Self {
            client_id,
            request_id,
            method,
            kwargs,
        })
    }
}

/// A decoded response.
#[derive(Debug, Clone)]
pub struct Response {
    pub client_id: ClientId,
    pub request_id: Uuid,
    pub kind: Kind,
    pub content: Value,
}

impl Response {
    pub fn new(client_id: ClientId, request_id: Uuid, kind: Kind, content: Value) -> Self {
        Self {
            client_id,
            request_id,
            kind,
            content,
        }
    }

    /// Encode as the 4-frame worker→broker / broker→client wire layout.
    pub fn encode(&self) -> Result<Vec<Bytes>, RpcError> {
        let kind_bytes = rmp_serde::to_vec(&self.kind.to_u8())?;
        let content_bytes = rmp_serde::to_vec_named(&self.content)?;
        Ok(vec![
            self.client_id.clone(),
            Bytes::copy_from_slice(self.request_id.as_bytes()),
            Bytes::from(kind_bytes),
            Bytes::from(content_bytes),
        ])
    }

    /// Decode the 4-frame worker→broker / broker→client wire layout.
    pub fn decode(frames: &[Bytes]) -> Result<Self, RpcError> {
        if frames.len() != 4 {
            return Err(RpcError::InvalidFrame(format!(
                "expected 4 response frames, got {}",
                frames.len()
            )));
        }
        let client_id = frames[0].clone();
        let request_id = Uuid::from_slice(&frames[1])
            .map_err(|e| RpcError::InvalidFrame(format!("bad request_id: {e}")))?;
        let kind_code: u8 = rmp_serde::from_slice(&frames[2])?;
        let kind = Kind::from_u8(kind_code)?;
        let content: Value = rmp_serde::from_slice(&frames[3])?;
        Ok(Self {
            client_id,
            request_id,
            kind,
            content,
        })
    }

    /// Construct the special heartbeat frame:
    /// `[b"", b"heartbeat", encode(HEARTBEAT), encode(nil)]`.
    pub fn heartbeat() -> Result<Vec<Bytes>, RpcError> {
        let kind_bytes = rmp_serde::to_vec(&Kind::Heartbeat.to_u8())?;
        let content_bytes = rmp_serde::to_vec(&Value::Nil)?;
        Ok(vec![
            Bytes::new(),
            Bytes::from_static(b"heartbeat"),
            Bytes::from(kind_bytes),
            Bytes::from(content_bytes),
        ])
    }

    /// True for the well-known `["", "heartbeat", ...]` frame shape, checked
    /// before attempting request-id correlation.
    pub fn is_heartbeat_frame(frames: &[Bytes]) -> bool {
        frames.len() == 4 && frames[0].is_empty() && frames[1].as_ref() == b"heartbeat"
    }

    /// Decode the 3-frame layout a DEALER client actually receives from a
    /// ROUTER-fronted broker: `[request_id, kind, content]`. The broker's
    /// frontend ROUTER consumes `client_id` as routing metadata before the
    /// remaining frames ever reach the client socket, so it never shows up
    /// in the payload here; `client_id` on the returned `Response` is left
    /// empty since the client already knows its own identity.
    pub fn decode_client(frames: &[Bytes]) -> Result<Self, RpcError> {
        if frames.len() != 3 {
            return Err(RpcError::InvalidFrame(format!(
                "expected 3 response frames, got {}",
                frames.len()
            )));
        }
        let request_id = Uuid::from_slice(&frames[0])
            .map_err(|e| RpcError::InvalidFrame(format!("bad request_id: {e}")))?;
        let kind_code: u8 = rmp_serde::from_slice(&frames[1])?;
        let kind = Kind::from_u8(kind_code)?;
        let content: Value = rmp_serde::from_slice(&frames[2])?;
        Ok(Self {
            client_id: Bytes::new(),
            request_id,
            kind,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kwargs() -> Value {
        Value::Map(vec![(
            Value::String("name".into()),
            Value::String("Ada".into()),
        )])
    }

    #[test]
    fn request_round_trips() {
        let req = Request::new("hello_world", sample_kwargs());
        let frames = req.encode().unwrap();
        assert_eq!(frames.len(), 3);
        let decoded = Request::decode(&frames).unwrap();
        assert_eq!(decoded.request_id, req.request_id);
        assert_eq!(decoded.method, "hello_world");
        assert_eq!(decoded.kwargs, sample_kwargs());
    }

    #[test]
    fn response_round_trips_every_kind() {
        let client_id = Bytes::from_static(b"client-1");
        let request_id = Uuid::new_v4();
        for kind in [
            Kind::Done,
            Kind::Update,
            Kind::Error,
            Kind::Heartbeat,
            Kind::Ready,
        ] {
            let resp = Response::new(client_id.clone(), request_id, kind, Value::String("x".into()));
            let frames = resp.encode().unwrap();
            let decoded = Response::decode(&frames).unwrap();
            assert_eq!(decoded.kind, kind);
            assert_eq!(decoded.request_id, request_id);
            assert_eq!(decoded.client_id, client_id);
        }
    }

    #[test]
    fn worker_request_round_trips() {
        let req = WorkerRequest {
            client_id: Bytes::from_static(b"client-1"),
            request_id: Uuid::new_v4(),
            method: "hello_world".to_string(),
            kwargs: sample_kwargs(),
        };
        let frames = req.encode().unwrap();
        assert_eq!(frames.len(), 4);
        let decoded = WorkerRequest::decode(&frames).unwrap();
        assert_eq!(decoded.client_id, req.client_id);
        assert_eq!(decoded.request_id, req.request_id);
        assert_eq!(decoded.method, req.method);
    }

    #[test]
    fn heartbeat_frame_has_well_known_shape() {
        let frames = Response::heartbeat().unwrap();
        assert!(Response::is_heartbeat_frame(&frames));
        assert_eq!(frames[0], Bytes::new());
        assert_eq!(frames[1].as_ref(), b"heartbeat");
    }

    #[test]
    fn wrong_frame_count_is_invalid_frame() {
        let err = Request::decode(&[Bytes::new(), Bytes::new()]).unwrap_err();
        assert!(matches!(err, RpcError::InvalidFrame(_)));
    }

    #[test]
    fn bad_request_id_is_invalid_frame() {
        let frames = vec![
            Bytes::from_static(b"short"),
            Bytes::from_static(b"ping"),
            Bytes::from(rmp_serde::to_vec(&Value::Nil).unwrap()),
        ];
        let err = Request::decode(&frames).unwrap_err();
        assert!(matches!(err, RpcError::InvalidFrame(_)));
    }

    #[test]
    fn unknown_kind_code_is_invalid_frame() {
        let err = Kind::from_u8(200).unwrap_err();
        assert!(matches!(err, RpcError::InvalidFrame(_)));
    }
}
