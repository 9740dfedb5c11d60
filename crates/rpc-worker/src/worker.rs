//! Worker process loop.
//!
//! Each worker owns a DEALER socket connected to the broker's backend ROUTER,
//! registers itself on connect by sending a HEARTBEAT, then loops: drain any
//! pending reply frames, poll the socket for an incoming request, or emit a
//! heartbeat if neither happens before the liveness interval elapses. Each
//! request is dispatched on its own spawned task so a slow handler never
//! blocks heartbeat emission or other in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use rpc_proto::socket::{create_dealer_and_connect, ZmqContext};
use rpc_proto::{Response, Transport, WorkerRequest, ZmqTransport};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::service::{call_remote, MethodRegistry, RequestContext};

/// Connect a DEALER socket identified by `identity` to the broker's backend
/// endpoint and wrap it as a worker.
pub fn connect(
    ctx: &ZmqContext,
    endpoint: &str,
    identity: &[u8],
    registry: MethodRegistry,
    heartbeat_interval: Duration,
) -> anyhow::Result<Worker<ZmqTransport<impl rpc_proto::socket::DealerSocket>>> {
    let socket = create_dealer_and_connect(ctx, endpoint, identity)
        .with_context(|| format!("worker failed to connect to {endpoint}"))?;
    Ok(Worker::new(ZmqTransport::new(socket), registry, heartbeat_interval))
}

/// Drives the request/reply loop for one worker process against a transport
/// already connected (as a DEALER) to the broker's backend socket.
pub struct Worker<T: Transport> {
    transport: T,
    registry: Arc<MethodRegistry>,
    heartbeat_interval: Duration,
}

impl<T: Transport> Worker<T> {
    pub fn new(transport: T, registry: MethodRegistry, heartbeat_interval: Duration) -> Self {
        Self {
            transport,
            registry: Arc::new(registry),
            heartbeat_interval,
        }
    }

    /// Run until the transport errors out (peer gone / socket closed).
    pub async fn run(mut self) -> rpc_proto::Result<()> {
        info!("worker starting, announcing with initial heartbeat");
        self.transport.send(Response::heartbeat()?).await?;

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<Bytes>>();

        loop {
            tokio::select! {
                frames = reply_rx.recv() => {
                    match frames {
                        Some(frames) => self.transport.send(frames).await?,
                        None => unreachable!("reply_tx is held for the lifetime of this loop"),
                    }
                }
                incoming = self.transport.recv() => {
                    match incoming {
                        Ok(frames) => self.handle_frames(frames, reply_tx.clone()),
                        Err(err) => {
                            warn!(error = %err, "worker transport closed");
                            return Err(err);
                        }
                    }
                }
                _ = tokio::time::sleep(self.heartbeat_interval) => {
                    debug!("idle past heartbeat interval, emitting heartbeat");
                    self.transport.send(Response::heartbeat()?).await?;
                }
            }
        }
    }

    fn handle_frames(&self, frames: Vec<Bytes>, reply_tx: mpsc::UnboundedSender<Vec<Bytes>>) {
        let request = match WorkerRequest::decode(&frames) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "dropping malformed worker request");
                return;
            }
        };
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            dispatch_one(registry, request, reply_tx).await;
        });
    }
}

/// Handle exactly one request to completion: zero or more UPDATE frames
/// followed by exactly one DONE or ERROR frame.
async fn dispatch_one(
    registry: Arc<MethodRegistry>,
    request: WorkerRequest,
    reply_tx: mpsc::UnboundedSender<Vec<Bytes>>,
) {
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let ctx = RequestContext::new(request.client_id.clone(), request.request_id, update_tx);

    let forward_updates = {
        let reply_tx = reply_tx.clone();
        let client_id = request.client_id.clone();
        let request_id = request.request_id;
        tokio::spawn(async move {
            while let Some(payload) = update_rx.recv().await {
                let response = Response::new(
                    client_id.clone(),
                    request_id,
                    rpc_proto::Kind::Update,
                    payload,
                );
                if let Ok(frames) = response.encode() {
                    let _ = reply_tx.send(frames);
                }
            }
        })
    };

    let outcome = call_remote(&registry, &ctx, &request.method, request.kwargs).await;
    drop(ctx);
    let _ = forward_updates.await;

    let (kind, content) = match outcome {
        Ok(value) => (rpc_proto::Kind::Done, value),
        Err(message) => (rpc_proto::Kind::Error, rmpv::Value::String(message.into())),
    };
    let response = Response::new(request.client_id, request.request_id, kind, content);
    match response.encode() {
        Ok(frames) => {
            let _ = reply_tx.send(frames);
        }
        Err(err) => warn!(error = %err, "failed to encode terminal response"),
    }
}
