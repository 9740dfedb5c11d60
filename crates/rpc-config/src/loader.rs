//! Config file discovery and environment-variable override application.

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::RpcConfig;

/// Record of where the active configuration came from, useful for
/// diagnostics (`rpc-cli` prints this on `--verbose`).
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// Discover candidate config file paths in priority order (later wins).
/// Non-existent paths are included; callers skip those that don't exist.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/rpcbroker/config.toml"));

    if let Some(base_dirs) = BaseDirs::new() {
        paths.push(base_dirs.config_dir().join("rpcbroker").join("config.toml"));
    }

    paths.push(PathBuf::from("./rpcbroker.toml"));

    if let Some(cli_path) = cli_path {
        paths.push(cli_path.to_path_buf());
    }

    paths
}

/// Apply `RPCBROKER_*` environment variable overrides onto an already-loaded
/// config, recording which keys were touched in `sources`.
pub fn apply_env_overrides(config: &mut RpcConfig, sources: &mut ConfigSources) {
    if let Ok(v) = std::env::var("RPCBROKER_FRONTEND_PORT") {
        if let Ok(port) = v.parse() {
            config.server.frontend_port = port;
            sources.env_overrides.push("RPCBROKER_FRONTEND_PORT".into());
        }
    }
    if let Ok(v) = std::env::var("RPCBROKER_BACKEND_PORT") {
        if let Ok(port) = v.parse() {
            config.server.backend_port = port;
            sources.env_overrides.push("RPCBROKER_BACKEND_PORT".into());
        }
    }
    if let Ok(v) = std::env::var("RPCBROKER_MODE") {
        let mode = match v.as_str() {
            "proxy" => Some(crate::BrokerMode::Proxy),
            "lru" => Some(crate::BrokerMode::Lru),
            _ => None,
        };
        if let Some(mode) = mode {
            config.server.mode = mode;
            sources.env_overrides.push("RPCBROKER_MODE".into());
        }
    }
    if let Ok(v) = std::env::var("RPCBROKER_CLIENT_ADDRESS") {
        config.client.address = v;
        sources.env_overrides.push("RPCBROKER_CLIENT_ADDRESS".into());
    }
    if let Ok(v) = std::env::var("RPCBROKER_WORKER_BACKEND_ADDRESS") {
        config.worker.backend_address = v;
        sources
            .env_overrides
            .push("RPCBROKER_WORKER_BACKEND_ADDRESS".into());
    }
}

/// Expand a leading `~/` into the user's home directory. Paths without a
/// leading `~` are returned unchanged.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base_dirs) = BaseDirs::new() {
            return base_dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_tilde_joins_home_dir() {
        let expanded = expand_path("~/rpcbroker.toml");
        if let Some(base_dirs) = BaseDirs::new() {
            assert_eq!(expanded, base_dirs.home_dir().join("rpcbroker.toml"));
        }
    }

    #[test]
    fn expand_path_absolute_is_unchanged() {
        assert_eq!(expand_path("/etc/rpcbroker/config.toml"), PathBuf::from("/etc/rpcbroker/config.toml"));
    }

    #[test]
    fn discovery_order_ends_with_cli_override() {
        let cli = Path::new("/tmp/custom.toml");
        let paths = discover_config_files_with_override(Some(cli));
        assert_eq!(paths.last().unwrap(), cli);
    }
}
