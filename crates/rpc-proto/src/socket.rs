//! ZMQ socket bring-up helpers, centralized so fixing an option here fixes
//! it for the broker, worker and client alike: LINGER=0 for clean shutdown,
//! bounded reconnect backoff on the DEALER side.

use anyhow::{Context, Result};
use futures::{Sink, Stream};
use tmq::{dealer, router, TmqError};

pub use tmq::Context as ZmqContext;
pub use tmq::Multipart;

/// Reconnect interval in milliseconds for DEALER sockets (client, worker).
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;

/// Capped maximum reconnect backoff in milliseconds.
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

/// Trait bound for DEALER sockets (send and receive).
pub trait DealerSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> DealerSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Trait bound for ROUTER sockets (send and receive with identities).
pub trait RouterSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> RouterSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Create a configured DEALER socket and connect to an endpoint.
pub fn create_dealer_and_connect(
    ctx: &ZmqContext,
    endpoint: &str,
    identity: &[u8],
) -> Result<impl DealerSocket> {
    dealer(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .set_identity(identity)
        .connect(endpoint)
        .with_context(|| format!("failed to connect DEALER to {endpoint}"))
}

/// Create a configured ROUTER socket and bind to an endpoint.
pub fn create_router_and_bind(ctx: &ZmqContext, endpoint: &str) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .bind(endpoint)
        .with_context(|| format!("failed to bind ROUTER to {endpoint}"))
}
