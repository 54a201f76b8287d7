//! # Forwarding Tunnel Entry Point
//!
//! ```text
//! mystfleet-proxy [<port>]
//! ```
//!
//! Listens on `0.0.0.0:<port>` (default 8100) and relays
//! `METHOD /proxy/<ip>/<port>/<rest>` to the node at `<ip>:<port>`.

use std::env;
use std::sync::Arc;

use tracing::{error, info, Level};

use mystfleet_proxy::{build_router, ProxyState};

const DEFAULT_PORT: u16 = 8100;

fn port_from_args() -> Result<u16, String> {
    let args: Vec<String> = env::args().collect();
    match args.get(1) {
        None => Ok(DEFAULT_PORT),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Usage: {} [<port>]", args[0])),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let port = match port_from_args() {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(ProxyState::new());
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Forwarding tunnel listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown requested...");
        })
        .await?;

    info!("Tunnel stopped cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_PORT, 8100);
    }
}
