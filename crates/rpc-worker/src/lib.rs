//! Service contract and worker process loop.

pub mod service;
pub mod worker;

pub use service::{call_remote, MethodRegistry, RemoteMethod, RequestContext, ServiceBuilder};
pub use worker::{connect, Worker};
