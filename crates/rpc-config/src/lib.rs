//! Layered TOML configuration for the broker, worker and client.
//!
//! Files are discovered in order (later wins):
//! 1. `/etc/rpcbroker/config.toml` (system)
//! 2. `$XDG_CONFIG_HOME/rpcbroker/config.toml` (user)
//! 3. `./rpcbroker.toml` or an explicit `--config` path (local override)
//! 4. Environment variables (`RPCBROKER_*`)

mod loader;

pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// `[server]` — broker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub frontend_port: u16,
    pub backend_port: u16,
    pub mode: BrokerMode,
    pub instances: u32,
    pub heartbeat_interval_min_ms: u64,
    pub heartbeat_interval_max_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frontend_port: 9990,
            backend_port: 9991,
            mode: BrokerMode::Lru,
            instances: 1,
            heartbeat_interval_min_ms: 1000,
            heartbeat_interval_max_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMode {
    Proxy,
    Lru,
}

/// `[worker]` — worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub backend_address: String,
    pub heartbeat_interval_min_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backend_address: "tcp://127.0.0.1:9991".to_string(),
            heartbeat_interval_min_ms: 1000,
        }
    }
}

/// `[client]` — client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub address: String,
    pub heartbeat_seconds: u64,
    pub server_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "tcp://127.0.0.1:9990".to_string(),
            heartbeat_seconds: 2,
            server_timeout_ms: 4000,
        }
    }
}

/// Complete configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RpcConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl RpcConfig {
    /// Load configuration from the standard discovery chain, applying
    /// `RPCBROKER_*` environment overrides last.
    pub fn load(cli_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = RpcConfig::default();

        for path in discover_config_files_with_override(cli_path) {
            if !path.exists() {
                continue;
            }
            let file_config = load_from_file(&path)?;
            config = merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);
        Ok(config)
    }
}

fn load_from_file(path: &std::path::Path) -> Result<RpcConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &std::path::Path) -> Result<RpcConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` onto `base`, field by field, keeping overlay's value
/// whenever it differs from that field's default (so an overlay file that
/// only sets one key does not clobber the rest with defaults).
fn merge_configs(base: RpcConfig, overlay: RpcConfig) -> RpcConfig {
    let default = RpcConfig::default();
    RpcConfig {
        server: ServerConfig {
            frontend_port: pick(
                base.server.frontend_port,
                overlay.server.frontend_port,
                default.server.frontend_port,
            ),
            backend_port: pick(
                base.server.backend_port,
                overlay.server.backend_port,
                default.server.backend_port,
            ),
            mode: if overlay.server.mode != default.server.mode {
                overlay.server.mode
            } else {
                base.server.mode
            },
            instances: pick(
                base.server.instances,
                overlay.server.instances,
                default.server.instances,
            ),
            heartbeat_interval_min_ms: pick(
                base.server.heartbeat_interval_min_ms,
                overlay.server.heartbeat_interval_min_ms,
                default.server.heartbeat_interval_min_ms,
            ),
            heartbeat_interval_max_ms: pick(
                base.server.heartbeat_interval_max_ms,
                overlay.server.heartbeat_interval_max_ms,
                default.server.heartbeat_interval_max_ms,
            ),
        },
        worker: WorkerConfig {
            backend_address: pick_string(
                base.worker.backend_address,
                overlay.worker.backend_address,
                &default.worker.backend_address,
            ),
            heartbeat_interval_min_ms: pick(
                base.worker.heartbeat_interval_min_ms,
                overlay.worker.heartbeat_interval_min_ms,
                default.worker.heartbeat_interval_min_ms,
            ),
        },
        client: ClientConfig {
            address: pick_string(base.client.address, overlay.client.address, &default.client.address),
            heartbeat_seconds: pick(
                base.client.heartbeat_seconds,
                overlay.client.heartbeat_seconds,
                default.client.heartbeat_seconds,
            ),
            server_timeout_ms: pick(
                base.client.server_timeout_ms,
                overlay.client.server_timeout_ms,
                default.client.server_timeout_ms,
            ),
        },
    }
}

fn pick<T: PartialEq + Copy>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

fn pick_string(base: String, overlay: String, default: &str) -> String {
    if overlay != default {
        overlay
    } else {
        base
    }
}
