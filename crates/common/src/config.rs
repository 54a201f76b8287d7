//! Simple config loader using TOML and serde.
//! The config struct is intentionally small and typed for the fleet manager.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::FleetError;
use crate::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    /// Bind address for the operator API (e.g., "0.0.0.0:7100").
    pub listen_addr: Option<String>,

    /// Directory where the registry snapshot is persisted.
    pub data_dir: Option<String>,

    /// Optional forwarding-tunnel base URL. When set, node traffic goes
    /// through `{proxy_base}/proxy/<ip>/<port>/...` instead of directly
    /// to the node.
    pub proxy_base: Option<String>,

    /// Per-request timeout for node API calls, in seconds.
    pub node_timeout_secs: Option<u64>,

    /// Development mode: back the controller with scripted in-memory nodes.
    pub use_mock_nodes: Option<bool>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            listen_addr: Some("0.0.0.0:7100".to_string()),
            data_dir: Some("./data".to_string()),
            proxy_base: None,
            node_timeout_secs: Some(10),
            use_mock_nodes: Some(false),
        }
    }
}

/// Load config from a TOML file path.
/// If the file is missing or parse fails, an error is returned.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ManagerConfig> {
    let p = path.as_ref();
    let s = fs::read_to_string(p)
        .map_err(|e| FleetError::Config(format!("{}: {}", p.display(), e)))?;
    let cfg: ManagerConfig =
        toml::from_str(&s).map_err(|e| FleetError::Config(e.to_string()))?;
    Ok(cfg)
}
