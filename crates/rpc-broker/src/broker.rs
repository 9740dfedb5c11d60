//! Broker event loop: transparent proxy (Mode A) and LRU load balancer
//! (Mode B).

use std::time::{Duration, Instant};

use anyhow::Context as _;
use bytes::Bytes;
use rpc_proto::{Kind, Request, Response, Transport, WorkerRequest};
use tracing::{debug, info, warn};

use crate::lru::WorkerTable;

/// How the broker routes frames between clients and workers.
pub enum Mode {
    /// Frames flow unmodified between frontend and backend via the
    /// transport's own fair-queue proxy; no heartbeat accounting.
    Proxy,
    /// Explicit LRU load balancing with heartbeat-driven liveness.
    Lru,
}

/// Run the transparent proxy: a blocking `zmq::proxy` between a ROUTER
/// frontend and a DEALER backend, since fair-queue forwarding is a native
/// socket-pair primitive rather than something expressible over the
/// abstract `Transport` trait.
pub async fn run_proxy(frontend_addr: String, backend_addr: String) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let ctx = zmq::Context::new();
        let frontend = ctx
            .socket(zmq::ROUTER)
            .context("failed to create proxy frontend socket")?;
        frontend
            .bind(&frontend_addr)
            .with_context(|| format!("failed to bind proxy frontend to {frontend_addr}"))?;
        let backend = ctx
            .socket(zmq::DEALER)
            .context("failed to create proxy backend socket")?;
        backend
            .bind(&backend_addr)
            .with_context(|| format!("failed to bind proxy backend to {backend_addr}"))?;

        info!(%frontend_addr, %backend_addr, "broker running in transparent proxy mode");
        zmq::proxy(&frontend, &backend).context("zmq proxy loop exited")?;
        Ok(())
    })
    .await
    .context("proxy task panicked")?
}

/// Run the LRU load balancer loop until either socket errors out.
///
/// `frontend` and `backend` are both ROUTER-bound transports: every frame
/// list `recv()` yields has the peer's identity as its first element.
pub async fn run_lru<F, B>(
    mut frontend: F,
    mut backend: B,
    heartbeat_interval_max: Duration,
) -> rpc_proto::Result<()>
where
    F: Transport,
    B: Transport,
{
    let mut table = WorkerTable::new(heartbeat_interval_max);
    let mut expiry_tick = tokio::time::interval(heartbeat_interval_max);

    loop {
        let backend_ready = table.backend_ready();
        tokio::select! {
            biased;

            backend_frames = backend.recv() => {
                handle_backend_frame(&mut table, &mut frontend, backend_frames?).await?;
            }

            frontend_frames = frontend.recv(), if backend_ready => {
                handle_frontend_frame(&mut table, &mut backend, frontend_frames?).await?;
            }

            _ = expiry_tick.tick() => {
                for worker_id in table.expire(Instant::now()) {
                    warn!(worker = ?worker_id, "worker expired: no liveness signal within window");
                }
            }
        }
    }
}

async fn handle_backend_frame<F: Transport>(
    table: &mut WorkerTable,
    frontend: &mut F,
    mut frames: Vec<Bytes>,
) -> rpc_proto::Result<()> {
    if frames.is_empty() {
        warn!("dropping empty backend frame");
        return Ok(());
    }
    let worker_id = frames.remove(0);

    if Response::is_heartbeat_frame(&frames) {
        let was_new = table.on_backend_event(worker_id.clone(), Kind::Heartbeat, Instant::now());
        if was_new {
            info!(worker = ?worker_id, "worker joined");
        } else {
            debug!(worker = ?worker_id, "worker heartbeat");
        }
        return Ok(());
    }

    let response = match Response::decode(&frames) {
        Ok(response) => response,
        Err(err) => {
            warn!(worker = ?worker_id, error = %err, "dropping malformed backend frame");
            return Ok(());
        }
    };

    let was_new = table.on_backend_event(worker_id.clone(), response.kind, Instant::now());
    if was_new {
        info!(worker = ?worker_id, "worker joined");
    }
    match response.kind {
        Kind::Done | Kind::Error => {
            debug!(worker = ?worker_id, request_id = %response.request_id, kind = ?response.kind, "worker available again");
        }
        Kind::Update => {
            debug!(worker = ?worker_id, request_id = %response.request_id, "worker progress update");
        }
        _ => {}
    }

    frontend.send(response.encode()?).await
}

async fn handle_frontend_frame<B: Transport>(
    table: &mut WorkerTable,
    backend: &mut B,
    mut frames: Vec<Bytes>,
) -> rpc_proto::Result<()> {
    if frames.is_empty() {
        warn!("dropping empty frontend frame");
        return Ok(());
    }
    let client_id = frames.remove(0);

    let request = match Request::decode(&frames) {
        Ok(request) => request,
        Err(err) => {
            warn!(client = ?client_id, error = %err, "dropping malformed frontend frame");
            return Ok(());
        }
    };

    let Some(worker_id) = table.dispatch() else {
        warn!(client = ?client_id, "no idle worker available despite backend_ready; dropping request");
        return Ok(());
    };

    debug!(worker = ?worker_id, client = ?client_id, request_id = %request.request_id, method = %request.method, "dispatching to worker");

    let worker_request = WorkerRequest {
        client_id,
        request_id: request.request_id,
        method: request.method,
        kwargs: request.kwargs,
    };
    let mut frames = vec![worker_id];
    frames.extend(worker_request.encode()?);
    backend.send(frames).await
}
