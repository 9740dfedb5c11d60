//! Command-line front door: broker, worker, and ad-hoc client entry points.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmpv::Value;
use rpc_proto::socket::ZmqContext;
use rpc_worker::{MethodRegistry, RemoteMethod, RequestContext, ServiceBuilder};
use tracing::info;

#[derive(Parser)]
#[command(name = "rpcbroker")]
#[command(about = "Broker, worker and client entry points for the RPC system")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file (overrides ./rpcbroker.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker (transparent proxy or LRU mode, per config)
    Serve {
        /// Print the resolved configuration and exit
        #[arg(long)]
        show_config: bool,
    },

    /// Run a worker process hosting the built-in demo service
    Work,

    /// Call a remote method against the broker and print the result
    Call {
        /// Method name
        method: String,

        /// Keyword arguments as a JSON object
        #[arg(long, default_value = "{}")]
        kwargs: String,

        /// Timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout: u64,
    },

    /// Probe server liveness
    Ping {
        /// Timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout: u64,
    },
}

/// Install the global `tracing` subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = rpc_config::RpcConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { show_config } => {
            if show_config {
                println!("{:#?}", config.server);
                return Ok(());
            }
            serve(config.server).await
        }
        Commands::Work => work(config.worker).await,
        Commands::Call {
            method,
            kwargs,
            timeout,
        } => call(config.client, &method, &kwargs, timeout).await,
        Commands::Ping { timeout } => ping(config.client, timeout).await,
    }
}

async fn serve(config: rpc_config::ServerConfig) -> Result<()> {
    let frontend_addr = format!("tcp://0.0.0.0:{}", config.frontend_port);
    let backend_addr = format!("tcp://0.0.0.0:{}", config.backend_port);

    match config.mode {
        rpc_config::BrokerMode::Proxy => {
            info!(%frontend_addr, %backend_addr, "starting broker in proxy mode");
            rpc_broker::run_proxy(frontend_addr, backend_addr).await
        }
        rpc_config::BrokerMode::Lru => {
            info!(%frontend_addr, %backend_addr, "starting broker in LRU mode");
            let ctx = ZmqContext::new();
            let frontend = rpc_proto::socket::create_router_and_bind(&ctx, &frontend_addr)
                .context("failed to bind broker frontend")?;
            let backend = rpc_proto::socket::create_router_and_bind(&ctx, &backend_addr)
                .context("failed to bind broker backend")?;
            let heartbeat_max =
                Duration::from_millis(config.heartbeat_interval_max_ms);
            rpc_broker::run_lru(
                rpc_proto::transport::router_transport(frontend),
                rpc_proto::transport::router_transport(backend),
                heartbeat_max,
            )
            .await
            .map_err(anyhow::Error::from)
        }
    }
}

async fn work(config: rpc_config::WorkerConfig) -> Result<()> {
    info!(endpoint = %config.backend_address, "starting worker");
    let ctx = ZmqContext::new();
    let identity = uuid::Uuid::new_v4();
    let registry = demo_registry();
    let heartbeat = Duration::from_millis(config.heartbeat_interval_min_ms);
    let worker = rpc_worker::connect(
        &ctx,
        &config.backend_address,
        identity.as_bytes(),
        registry,
        heartbeat,
    )?;
    worker.run().await.map_err(anyhow::Error::from)
}

async fn call(config: rpc_config::ClientConfig, method: &str, kwargs_json: &str, timeout_ms: u64) -> Result<()> {
    let client = connect_client(&config)?;
    client.bootstrap().await.context("client bootstrap failed")?;

    let kwargs_json: serde_json::Value =
        serde_json::from_str(kwargs_json).context("kwargs must be a JSON object")?;
    let kwargs = rmpv::ext::to_value(&kwargs_json).context("failed to encode kwargs")?;

    let pending = client
        .call(method, kwargs)
        .await
        .context("failed to enqueue call")?;
    let terminal = pending.wait(Duration::from_millis(timeout_ms)).await;
    print_terminal(&terminal);
    Ok(())
}

async fn ping(config: rpc_config::ClientConfig, timeout_ms: u64) -> Result<()> {
    let client = connect_client(&config)?;
    let pending = client
        .call("ping", rmpv::Value::Nil)
        .await
        .context("failed to enqueue ping")?;
    let terminal = pending.wait(Duration::from_millis(timeout_ms)).await;
    match terminal {
        rpc_result::Terminal::Done(_) => {
            println!("pong");
            Ok(())
        }
        other => {
            print_terminal(&other);
            anyhow::bail!("ping did not complete successfully")
        }
    }
}

fn connect_client(config: &rpc_config::ClientConfig) -> Result<Arc<rpc_client::Client>> {
    let ctx = ZmqContext::new();
    let identity = uuid::Uuid::new_v4();
    let client = rpc_client::Client::connect_zmq(
        &ctx,
        &config.address,
        identity.as_bytes(),
        config.heartbeat_seconds,
    )
    .context("failed to connect client")?;
    Ok(Arc::new(client))
}

fn print_terminal(terminal: &rpc_result::Terminal) {
    match terminal {
        rpc_result::Terminal::Done(value) => {
            let json = rmpv::ext::from_value::<serde_json::Value>(value.clone())
                .unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        rpc_result::Terminal::Error(message) => {
            eprintln!("error: {message}");
        }
        rpc_result::Terminal::Pending => {
            eprintln!("timed out waiting for a response");
        }
    }
}

struct HelloWorld;
#[async_trait::async_trait]
impl RemoteMethod for HelloWorld {
    async fn call(&self, _ctx: &RequestContext, kwargs: Value) -> std::result::Result<Value, String> {
        let name = kwargs
            .as_map()
            .and_then(|m| m.iter().find(|(k, _)| k.as_str() == Some("name")))
            .and_then(|(_, v)| v.as_str())
            .unwrap_or("world")
            .to_string();
        Ok(Value::String(format!("Hi, {name}").into()))
    }
}

/// The demo service every `rpcbroker work` process hosts: `ping` and
/// `client_config` (registered automatically) plus `hello_world`.
fn demo_registry() -> MethodRegistry {
    ServiceBuilder::new()
        .remote("hello_world", Arc::new(HelloWorld))
        .build()
}
