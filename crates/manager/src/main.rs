//! # Fleet Manager Entry Point
//!
//! ## Configuration Modes
//!
//! ### Mode 1: TOML file
//! ```text
//! mystfleet-manager <config.toml>
//! ```
//!
//! ### Mode 2: Environment variables
//! ```text
//! mystfleet-manager env
//! ```
//!
//! Environment variables for env mode (all optional, defaults apply):
//! - `FLEET_LISTEN_ADDR`: operator API bind address
//! - `FLEET_DATA_DIR`: registry snapshot directory
//! - `FLEET_PROXY_BASE`: forwarding tunnel base URL
//! - `FLEET_NODE_TIMEOUT_SECS`: per-request node API timeout
//! - `FLEET_USE_MOCK_NODES`: back the controller with scripted nodes
//!
//! Running with no arguments uses the defaults.
//!
//! ## Initialization Flow
//! 1. Parse configuration (file, env, or defaults)
//! 2. Validate configuration
//! 3. Open the registry store and rehydrate the registry
//! 4. Build the node API factory (HTTP, or mock in dev mode)
//! 5. Serve the operator API until Ctrl+C

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{error, info, Level};

use mystfleet_common::{config, ManagerConfig};
use mystfleet_manager::{
    build_router, mock_node::MockApiFactory, FileRegistryStore, FleetController,
    HttpApiFactory, ManagerAppState, NodeApiFactory, NodeRegistry,
};

// ════════════════════════════════════════════════════════════════════════════
// BOOT CONFIGURATION
// ════════════════════════════════════════════════════════════════════════════

/// Fully resolved settings the manager boots with.
#[derive(Debug, Clone)]
struct BootConfig {
    listen_addr: String,
    data_dir: String,
    proxy_base: Option<String>,
    node_timeout_secs: u64,
    use_mock_nodes: bool,
    /// Configuration source (file, env, defaults).
    config_source: String,
}

impl BootConfig {
    /// Parse configuration from CLI arguments.
    ///
    /// Usage: mystfleet-manager [<config.toml> | env]
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        match args.get(1).map(|s| s.as_str()) {
            None => Ok(Self::resolve(ManagerConfig::default(), "defaults")),
            Some("env") => Self::from_env(),
            Some("--help") | Some("-h") => Err(Self::usage_message(&args[0])),
            Some(path) => {
                let cfg = config::load_from_file(path).map_err(|e| e.to_string())?;
                Ok(Self::resolve(cfg, "file"))
            }
        }
    }

    /// Parse configuration from environment variables.
    fn from_env() -> Result<Self, String> {
        let mut cfg = ManagerConfig::default();
        if let Ok(v) = env::var("FLEET_LISTEN_ADDR") {
            cfg.listen_addr = Some(v);
        }
        if let Ok(v) = env::var("FLEET_DATA_DIR") {
            cfg.data_dir = Some(v);
        }
        if let Ok(v) = env::var("FLEET_PROXY_BASE") {
            cfg.proxy_base = Some(v);
        }
        if let Ok(v) = env::var("FLEET_NODE_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| "FLEET_NODE_TIMEOUT_SECS must be a number".to_string())?;
            cfg.node_timeout_secs = Some(secs);
        }
        if let Ok(v) = env::var("FLEET_USE_MOCK_NODES") {
            cfg.use_mock_nodes = Some(v.to_lowercase() == "true" || v == "1");
        }
        Ok(Self::resolve(cfg, "env"))
    }

    /// Fills gaps in a loaded config with defaults.
    fn resolve(cfg: ManagerConfig, source: &str) -> Self {
        let defaults = ManagerConfig::default();
        Self {
            listen_addr: cfg
                .listen_addr
                .or(defaults.listen_addr)
                .unwrap_or_default(),
            data_dir: cfg.data_dir.or(defaults.data_dir).unwrap_or_default(),
            proxy_base: cfg.proxy_base,
            node_timeout_secs: cfg
                .node_timeout_secs
                .or(defaults.node_timeout_secs)
                .unwrap_or(10),
            use_mock_nodes: cfg.use_mock_nodes.unwrap_or(false),
            config_source: source.to_string(),
        }
    }

    /// Generate usage message.
    fn usage_message(prog: &str) -> String {
        format!(
            "Usage:\n\
             \n\
             Mode 1 - TOML config file:\n\
             {} <config.toml>\n\
             \n\
             Mode 2 - Environment variables:\n\
             {} env\n\
             \n\
             Optional environment variables for env mode:\n\
             FLEET_LISTEN_ADDR        - Operator API bind address\n\
             FLEET_DATA_DIR           - Registry snapshot directory\n\
             FLEET_PROXY_BASE         - Forwarding tunnel base URL\n\
             FLEET_NODE_TIMEOUT_SECS  - Node API request timeout\n\
             FLEET_USE_MOCK_NODES     - Scripted nodes for development\n\
             \n\
             With no arguments, built-in defaults are used.",
            prog, prog
        )
    }

    /// Validate configuration.
    fn validate(&self) -> Result<(), String> {
        if self.data_dir.is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }
        if self.node_timeout_secs == 0 {
            return Err("Node timeout cannot be 0".to_string());
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|_| format!("Invalid listen address: {}", self.listen_addr))?;
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Parse and validate configuration
    let config = match BootConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("═══════════════════════════════════════════════════════════════");
    info!("               mystfleet Manager                                ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("Listen Addr:  {}", config.listen_addr);
    info!("Config Mode:  {}", config.config_source);
    info!("Data Dir:     {}", config.data_dir);
    info!(
        "Node Access:  {}",
        config
            .proxy_base
            .as_deref()
            .unwrap_or("direct (no tunnel)")
    );
    info!("Mock Nodes:   {}", config.use_mock_nodes);
    info!("═══════════════════════════════════════════════════════════════");

    // Rehydrate the registry from the last persisted snapshot. Loaded
    // records carry no live handles; those are rebuilt on first use from
    // the cached tokens, without asking for passwords again.
    let store = Arc::new(FileRegistryStore::new(PathBuf::from(&config.data_dir)));
    let registry = NodeRegistry::rehydrate(store);
    if registry.is_empty() {
        info!("Starting with an empty registry");
    } else {
        info!("Restored {} node(s) from snapshot", registry.len());
    }
    let registry = Arc::new(RwLock::new(registry));

    // Node API factory: real HTTP transport, or scripted nodes in dev mode.
    let factory: Arc<dyn NodeApiFactory> = if config.use_mock_nodes {
        info!("Using scripted mock nodes");
        Arc::new(MockApiFactory::new())
    } else {
        Arc::new(HttpApiFactory::new(
            Duration::from_secs(config.node_timeout_secs),
            config.proxy_base.clone(),
        ))
    };

    let controller = Arc::new(FleetController::new(registry, factory));
    let app_state = Arc::new(ManagerAppState {
        controller,
        start_time: now_secs(),
    });
    let router = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Operator API listening on http://{}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown requested...");
        })
        .await?;

    info!("Manager stopped cleanly");
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
