//! Error taxonomy shared by the broker, worker and client crates.

use thiserror::Error;

/// Library-level error taxonomy. Binaries wrap setup failures in `anyhow`
/// instead; this enum covers only the per-request / per-frame failure modes
/// a library caller needs to match on.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Service has no `remote__<name>` registered.
    #[error("Service does not support remote method \"{0}\"")]
    UnknownMethod(String),

    /// Remote method raised while executing.
    #[error("Error: {0}")]
    ServiceException(String),

    /// Frame could not be decoded: wrong frame count, bad kind, bad payload.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Worker expired out of the broker's table before a terminal response arrived.
    #[error("broker lost its connection to the worker handling this request")]
    BrokerWorkerLoss,

    /// Client-side request queue is full.
    #[error("request queue is full")]
    Backpressure,

    /// MessagePack encode failure.
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decode failure.
    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Underlying ZMQ transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
