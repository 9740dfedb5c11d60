//! Outgoing request queue, response demultiplexer and liveness monitor.

pub mod client;
pub mod error;

pub use client::{Client, PendingCall};
pub use error::ClientError;
pub use rpc_result::{Signal, Terminal};
