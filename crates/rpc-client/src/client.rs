//! Client reactor, result registry and liveness monitor.
//!
//! A reactor task owns the transport and demultiplexes inbound frames by
//! request id; a dispatch task drains each request's queued UPDATE/DONE/
//! ERROR events to its observers; an optional heartbeat task pings the
//! broker when idle and flips readiness off once the peer goes quiet for
//! too long.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use bytes::Bytes;
use rmpv::Value;
use rpc_proto::socket::{create_dealer_and_connect, ZmqContext};
use rpc_proto::{Kind, Request, Response, Transport, ZmqTransport};
use rpc_result::{DeferredResult, Handle, Signal, Terminal};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ClientError;

/// High-water mark for the outgoing request queue.
const REQUEST_QUEUE_CAPACITY: usize = 1000;

struct Entry {
    deferred: DeferredResult,
    done_tx: Option<oneshot::Sender<Terminal>>,
    /// Cloned into the owning `PendingCall`; dispatch_task only reclaims an
    /// entry once its strong count drops back to 1 (the registry's own
    /// copy), i.e. once the `PendingCall` itself has been dropped. Without
    /// this, a response that resolves before anyone calls `wait()` could be
    /// swept up and discarded by the next dispatch tick.
    alive: Arc<()>,
}

struct Shared {
    registry: Mutex<HashMap<Uuid, Entry>>,
    allowed_methods: RwLock<Option<Vec<String>>>,
    ready: AtomicBool,
    last_inbound: RwLock<Instant>,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            allowed_methods: RwLock::new(None),
            ready: AtomicBool::new(true),
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    async fn mark_inbound(&self) {
        *self.last_inbound.write().await = Instant::now();
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!("server connection recovered");
        }
    }
}

/// A handle to one in-flight request's `DeferredResult`, shared with the
/// reactor and dispatch tasks through the client's registry.
pub struct PendingCall {
    pub request_id: Uuid,
    shared: Arc<Shared>,
    _alive: Arc<()>,
}

impl PendingCall {
    /// Register an observer for `signal` on this call's result.
    pub async fn connect<F>(&self, signal: Signal, callback: F) -> Option<Handle>
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let mut registry = self.shared.registry.lock().await;
        registry
            .get_mut(&self.request_id)
            .map(|entry| entry.deferred.connect(signal, callback))
    }

    /// Block until this call reaches a terminal state or `timeout` elapses
    /// (zero means wait forever), then return that terminal state.
    pub async fn wait(&self, timeout: Duration) -> Terminal {
        let done_rx = {
            let mut registry = self.shared.registry.lock().await;
            let Some(entry) = registry.get_mut(&self.request_id) else {
                return Terminal::Error("request is no longer tracked".to_string());
            };
            if entry.deferred.is_ready() {
                return entry.deferred.terminal().clone();
            }
            let (tx, rx) = oneshot::channel();
            entry.done_tx = Some(tx);
            rx
        };

        let outcome = if timeout.is_zero() {
            done_rx.await.ok()
        } else {
            tokio::time::timeout(timeout, done_rx).await.ok().and_then(Result::ok)
        };
        outcome.unwrap_or(Terminal::Pending)
    }
}

/// Outgoing request queue, response demultiplexer and liveness monitor.
/// Owns no socket directly; `connect` spawns the reactor, dispatch, and
/// (if configured) heartbeat tasks against a `Transport`.
pub struct Client {
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<Vec<Bytes>>,
}

impl Client {
    /// Start the client against an already-connected transport.
    /// `heartbeat_seconds == 0` disables the liveness probe.
    pub fn connect<T>(transport: T, heartbeat_seconds: u64) -> Self
    where
        T: Transport + 'static,
    {
        let shared = Arc::new(Shared::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        tokio::spawn(reactor_task(transport, Arc::clone(&shared), outbound_rx));
        tokio::spawn(dispatch_task(Arc::clone(&shared)));
        if heartbeat_seconds > 0 {
            tokio::spawn(heartbeat_task(
                Arc::clone(&shared),
                heartbeat_seconds,
                outbound_tx.clone(),
            ));
        }

        Self {
            shared,
            outbound_tx,
        }
    }

    /// Connect a DEALER socket identified by `identity` to the broker's
    /// frontend endpoint and start a client against it.
    pub fn connect_zmq(
        ctx: &ZmqContext,
        endpoint: &str,
        identity: &[u8],
        heartbeat_seconds: u64,
    ) -> anyhow::Result<Self> {
        let socket = create_dealer_and_connect(ctx, endpoint, identity)
            .with_context(|| format!("client failed to connect to {endpoint}"))?;
        Ok(Self::connect(ZmqTransport::new(socket), heartbeat_seconds))
    }

    /// True iff an inbound frame has arrived within the last two heartbeat
    /// intervals.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Issue `client_config` and store the returned method list, unblocking
    /// every other method name for subsequent `call`s.
    pub async fn bootstrap(&self) -> Result<(), ClientError> {
        let pending = self.call("client_config", Value::Nil).await?;
        match pending.wait(Duration::from_secs(10)).await {
            Terminal::Done(Value::Array(names)) => {
                let names: Vec<String> = names
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                *self.shared.allowed_methods.write().await = Some(names);
                Ok(())
            }
            Terminal::Done(_) => Err(ClientError::Disconnected),
            Terminal::Error(message) => Err(ClientError::Proto(rpc_proto::RpcError::Transport(
                message,
            ))),
            Terminal::Pending => Err(ClientError::Disconnected),
        }
    }

    /// Enqueue a call to `name` with `kwargs`, returning its `PendingCall`.
    /// Only `client_config` and `ping` are callable before `bootstrap`.
    pub async fn call(&self, name: &str, kwargs: Value) -> Result<PendingCall, ClientError> {
        if name != "client_config" && name != "ping" {
            let allowed = self.shared.allowed_methods.read().await;
            match allowed.as_ref() {
                None => return Err(ClientError::NotBootstrapped),
                Some(methods) if !methods.iter().any(|m| m == name) => {
                    return Err(ClientError::UnknownMethod(name.to_string()))
                }
                _ => {}
            }
        }

        let request = Request::new(name, kwargs);
        let request_id = request.request_id;
        let alive = Arc::new(());
        {
            let mut registry = self.shared.registry.lock().await;
            registry.insert(
                request_id,
                Entry {
                    deferred: DeferredResult::new(request_id),
                    done_tx: None,
                    alive: Arc::clone(&alive),
                },
            );
        }

        let frames = request.encode()?;
        self.outbound_tx
            .try_send(frames)
            .map_err(|_| ClientError::Proto(rpc_proto::RpcError::Backpressure))?;

        Ok(PendingCall {
            request_id,
            shared: Arc::clone(&self.shared),
            _alive: alive,
        })
    }
}

async fn reactor_task<T: Transport>(
    mut transport: T,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::Receiver<Vec<Bytes>>,
) {
    loop {
        tokio::select! {
            biased;

            frames = outbound_rx.recv() => {
                match frames {
                    Some(frames) => {
                        if let Err(err) = transport.send(frames).await {
                            warn!(error = %err, "client send failed");
                        }
                    }
                    None => {
                        debug!("client outbound queue closed, reactor exiting");
                        break;
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Ok(frames) => handle_incoming(&shared, frames).await,
                    Err(err) => {
                        warn!(error = %err, "client transport closed");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_incoming(shared: &Arc<Shared>, frames: Vec<Bytes>) {
    if Response::is_heartbeat_frame(&frames) {
        shared.mark_inbound().await;
        return;
    }

    let response = match Response::decode_client(&frames) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "dropping malformed response");
            return;
        }
    };
    shared.mark_inbound().await;

    let mut registry = shared.registry.lock().await;
    let Some(entry) = registry.get_mut(&response.request_id) else {
        debug!(request_id = %response.request_id, "discarding orphan response");
        return;
    };

    match response.kind {
        Kind::Update => entry.deferred.update(response.content),
        Kind::Done => {
            entry.deferred.done(Some(response.content));
            if let Some(tx) = entry.done_tx.take() {
                let _ = tx.send(entry.deferred.terminal().clone());
            }
        }
        Kind::Error => {
            let message = response
                .content
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", response.content));
            entry.deferred.failure(message);
            if let Some(tx) = entry.done_tx.take() {
                let _ = tx.send(entry.deferred.terminal().clone());
            }
        }
        Kind::Heartbeat | Kind::Ready => {}
    }
}

async fn dispatch_task(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(Duration::from_millis(10));
    loop {
        tick.tick().await;
        let mut registry = shared.registry.lock().await;
        let mut finished = Vec::new();
        for (request_id, entry) in registry.iter_mut() {
            entry.deferred.process();
            if entry.deferred.is_ready()
                && entry.deferred.pending_events() == 0
                && Arc::strong_count(&entry.alive) <= 1
            {
                finished.push(*request_id);
            }
        }
        for request_id in finished {
            registry.remove(&request_id);
        }
    }
}

async fn heartbeat_task(
    shared: Arc<Shared>,
    heartbeat_seconds: u64,
    outbound_tx: mpsc::Sender<Vec<Bytes>>,
) {
    let interval = Duration::from_secs(heartbeat_seconds);
    let expiry = interval * 2;
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        let last_inbound = *shared.last_inbound.read().await;
        let elapsed = last_inbound.elapsed();

        if elapsed >= expiry {
            if shared.ready.swap(false, Ordering::SeqCst) {
                warn!("connection lost: no inbound activity within liveness window");
            }
            continue;
        }

        if elapsed >= interval {
            let ping = Request::new("ping", Value::Nil);
            if let Ok(frames) = ping.encode() {
                let _ = outbound_tx.try_send(frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_proto::mock_pair;

    /// A real broker's frontend ROUTER consumes `client_id` for routing
    /// before the remaining frames reach the client's DEALER socket; drop
    /// it here so the mock transport mirrors that wire behavior.
    fn strip_client_id(response: Response) -> Vec<Bytes> {
        let mut frames = response.encode().unwrap();
        frames.remove(0);
        frames
    }

    #[tokio::test]
    async fn call_before_bootstrap_rejects_unknown_method() {
        let (_server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);
        let err = client.call("custom_method", Value::Nil).await.unwrap_err();
        assert!(matches!(err, ClientError::NotBootstrapped));
    }

    #[tokio::test]
    async fn ping_is_callable_before_bootstrap() {
        let (_server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);
        assert!(client.call("ping", Value::Nil).await.is_ok());
    }

    #[tokio::test]
    async fn done_response_resolves_pending_call() {
        let (mut server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);

        let pending = client.call("ping", Value::Nil).await.unwrap();
        let request_frames = server_side.recv().await.unwrap();
        let request = Request::decode(&request_frames).unwrap();

        let response = Response::new(
            Bytes::from_static(b"client-1"),
            request.request_id,
            Kind::Done,
            Value::Nil,
        );
        server_side.send(strip_client_id(response)).await.unwrap();

        let terminal = pending.wait(Duration::from_secs(1)).await;
        assert_eq!(terminal, Terminal::Done(Value::Nil));
    }

    #[tokio::test]
    async fn error_response_resolves_pending_call_as_error() {
        let (mut server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);

        let pending = client.call("ping", Value::Nil).await.unwrap();
        let request_frames = server_side.recv().await.unwrap();
        let request = Request::decode(&request_frames).unwrap();

        let response = Response::new(
            Bytes::from_static(b"client-1"),
            request.request_id,
            Kind::Error,
            Value::String("boom".into()),
        );
        server_side.send(strip_client_id(response)).await.unwrap();

        let terminal = pending.wait(Duration::from_secs(1)).await;
        assert_eq!(terminal, Terminal::Error("boom".to_string()));
    }

    #[tokio::test]
    async fn late_wait_still_observes_terminal_after_dispatch_ticks() {
        let (mut server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);

        let pending = client.call("ping", Value::Nil).await.unwrap();
        let request_frames = server_side.recv().await.unwrap();
        let request = Request::decode(&request_frames).unwrap();

        let response = Response::new(
            Bytes::from_static(b"client-1"),
            request.request_id,
            Kind::Done,
            Value::Nil,
        );
        server_side.send(strip_client_id(response)).await.unwrap();

        // Let several dispatch ticks pass before ever calling wait(); the
        // entry must not be reclaimed while `pending` is still alive.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let terminal = pending.wait(Duration::from_secs(1)).await;
        assert_eq!(terminal, Terminal::Done(Value::Nil));
    }

    #[tokio::test]
    async fn bootstrap_unlocks_advertised_methods() {
        let (mut server_side, client_transport) = mock_pair();
        let client = Client::connect(client_transport, 0);

        let bootstrap = tokio::spawn(async move {
            let client = Arc::new(client);
            let result = client.bootstrap().await;
            (client, result)
        });

        let request_frames = server_side.recv().await.unwrap();
        let request = Request::decode(&request_frames).unwrap();
        assert_eq!(request.method, "client_config");

        let names = Value::Array(vec![Value::String("hello_world".into())]);
        let response = Response::new(
            Bytes::from_static(b"client-1"),
            request.request_id,
            Kind::Done,
            names,
        );
        server_side.send(strip_client_id(response)).await.unwrap();

        let (client, result) = bootstrap.await.unwrap();
        result.unwrap();
        assert!(client.call("hello_world", Value::Nil).await.is_ok());
    }
}
