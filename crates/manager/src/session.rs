//! # Session Manager
//!
//! Produces a usable `(handle, token)` pair for a node address. Two paths:
//!
//! - **Fresh authentication** (password supplied): build a new handle for
//!   `ip:port`, authenticate as the fixed management user, attach the
//!   returned token. Any failure here is an authentication failure — the
//!   credential never entered the registry.
//! - **Reuse** (no password): the node must already be registered. The
//!   cached token is reused; the cached handle is reused only if it is a
//!   live one. A record rehydrated from disk carries no live handle, so a
//!   fresh handle is built and the token reattached without
//!   re-authenticating.

use std::sync::Arc;

use parking_lot::RwLock;

use mystfleet_common::{FleetError, Result};

use crate::node_api::{NodeApi, NodeApiFactory, AUTH_USERNAME};
use crate::registry::NodeRegistry;

pub struct SessionManager {
    registry: Arc<RwLock<NodeRegistry>>,
    factory: Arc<dyn NodeApiFactory>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<RwLock<NodeRegistry>>,
        factory: Arc<dyn NodeApiFactory>,
    ) -> Self {
        Self { registry, factory }
    }

    /// Returns a live handle and its token for `address`, authenticating
    /// fresh when a password is given and reusing the cached token
    /// otherwise.
    ///
    /// ## Errors
    ///
    /// - [`FleetError::Authentication`] when fresh authentication fails
    ///   (bad credentials or unreachable auth endpoint).
    /// - [`FleetError::UnknownNode`] on the reuse path when `address` is
    ///   not registered.
    pub async fn acquire(
        &self,
        address: &str,
        ip: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<(Arc<dyn NodeApi>, String)> {
        match password {
            Some(password) => {
                let handle = self.factory.build(ip, port);
                let token = handle.authenticate(AUTH_USERNAME, password).await?;
                handle.attach_token(&token);
                Ok((handle, token))
            }
            None => {
                // Snapshot token + handle under the read lock, then work
                // without holding it across awaits.
                let (token, cached) = {
                    let registry = self.registry.read();
                    let record = registry
                        .get(address)
                        .ok_or_else(|| FleetError::UnknownNode(address.to_string()))?;
                    (record.token.clone(), record.handle.clone())
                };
                let handle = match cached {
                    Some(handle) => handle,
                    None => {
                        let handle = self.factory.build(ip, port);
                        handle.attach_token(&token);
                        handle
                    }
                };
                Ok((handle, token))
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
