//! Wire envelope, error taxonomy and transport abstraction shared by the
//! broker, worker and client crates.

pub mod envelope;
pub mod error;
pub mod socket;
pub mod transport;

pub use envelope::{ClientId, Kind, Request, Response, WorkerRequest};
pub use error::{Result, RpcError};
pub use transport::{mock_pair, MockTransport, Transport, ZmqTransport};
