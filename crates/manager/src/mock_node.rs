//! # Mock Node
//!
//! Scripted in-memory [`NodeApi`] implementation behind the same trait as
//! the HTTP client. Used by unit and integration tests, and by the manager
//! binary's development mode (`use_mock_nodes = true`).
//!
//! Every call is recorded, so tests can assert not just outcomes but which
//! remote operations were issued (e.g. that token reuse never
//! re-authenticates).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use mystfleet_common::{
    ConflictKind, FleetError, HealthSnapshot, IdentityRef, Result, ServiceInfo,
    StatsSnapshot,
};

use crate::node_api::{NodeApi, NodeApiFactory};

/// Service id assigned when a mock service starts.
pub const MOCK_SERVICE_ID: &str = "svc1";

#[derive(Debug)]
pub struct MockNode {
    address: Mutex<String>,
    /// Token issued by `authenticate` and required on authed calls.
    token: String,
    /// When set, `authenticate` rejects any other password.
    expected_password: Mutex<Option<String>>,
    /// Token currently attached to the handle.
    attached: Mutex<Option<String>>,
    /// Simulates token revocation on the node side.
    revoked: AtomicBool,
    /// When false every call fails at the transport level.
    reachable: AtomicBool,
    health: Mutex<HealthSnapshot>,
    stats: Mutex<StatsSnapshot>,
    identities: Mutex<Vec<IdentityRef>>,
    services: Mutex<Vec<ServiceInfo>>,
    calls: Mutex<Vec<String>>,
}

impl MockNode {
    /// A reachable node that issues `token`, with default snapshots and no
    /// running services.
    pub fn healthy(token: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Mutex::new("mock".to_string()),
            token: token.to_string(),
            expected_password: Mutex::new(None),
            attached: Mutex::new(None),
            revoked: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            health: Mutex::new(HealthSnapshot {
                uptime: 1,
                version: "0.0".to_string(),
            }),
            stats: Mutex::new(StatsSnapshot::default()),
            identities: Mutex::new(vec![IdentityRef {
                id: "id0".to_string(),
            }]),
            services: Mutex::new(vec![]),
            calls: Mutex::new(vec![]),
        })
    }

    /// A node that fails every call at the transport level.
    pub fn unreachable() -> Arc<Self> {
        let node = Self::healthy("");
        node.reachable.store(false, Ordering::SeqCst);
        node
    }

    // ────────────────────────────────────────────────────────────────
    // SCRIPTING
    // ────────────────────────────────────────────────────────────────

    pub fn set_address(&self, address: &str) {
        *self.address.lock() = address.to_string();
    }

    pub fn require_password(&self, password: &str) {
        *self.expected_password.lock() = Some(password.to_string());
    }

    /// Simulate the node rejecting its previously issued token.
    pub fn revoke_token(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn set_health(&self, health: HealthSnapshot) {
        *self.health.lock() = health;
    }

    pub fn set_stats(&self, stats: StatsSnapshot) {
        *self.stats.lock() = stats;
    }

    pub fn set_identities(&self, identities: Vec<IdentityRef>) {
        *self.identities.lock() = identities;
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        *self.services.lock() = services;
    }

    pub fn is_running(&self) -> bool {
        !self.services.lock().is_empty()
    }

    /// Names of all calls issued against this node, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    // ────────────────────────────────────────────────────────────────
    // INTERNAL
    // ────────────────────────────────────────────────────────────────

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FleetError::Transport {
                address: self.address.lock().clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn check_auth(&self) -> Result<()> {
        self.check_reachable()?;
        let attached_ok = self.attached.lock().as_deref() == Some(self.token.as_str());
        if self.revoked.load(Ordering::SeqCst) || !attached_ok {
            return Err(FleetError::Unauthorized {
                address: self.address.lock().clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeApi for MockNode {
    async fn authenticate(&self, _username: &str, password: &str) -> Result<String> {
        self.record("authenticate");
        if self.check_reachable().is_err() {
            return Err(FleetError::Authentication {
                address: self.address.lock().clone(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(expected) = self.expected_password.lock().as_deref() {
            if expected != password {
                return Err(FleetError::Authentication {
                    address: self.address.lock().clone(),
                    reason: "invalid credentials".to_string(),
                });
            }
        }
        Ok(self.token.clone())
    }

    fn attach_token(&self, token: &str) {
        self.record("attach_token");
        *self.attached.lock() = Some(token.to_string());
    }

    async fn health_check(&self) -> Result<HealthSnapshot> {
        self.record("health_check");
        self.check_auth()?;
        Ok(self.health.lock().clone())
    }

    async fn session_stats(&self) -> Result<StatsSnapshot> {
        self.record("session_stats");
        self.check_auth()?;
        Ok(self.stats.lock().clone())
    }

    async fn identities(&self) -> Result<Vec<IdentityRef>> {
        self.record("identities");
        self.check_auth()?;
        Ok(self.identities.lock().clone())
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        self.record("services");
        self.check_auth()?;
        Ok(self.services.lock().clone())
    }

    async fn service_start(&self, provider_id: &str, service_type: &str) -> Result<()> {
        self.record(format!("service_start:{}", provider_id));
        self.check_auth()?;
        let mut services = self.services.lock();
        if !services.is_empty() {
            return Err(FleetError::Conflict {
                address: self.address.lock().clone(),
                kind: ConflictKind::AlreadyRunning,
            });
        }
        services.push(ServiceInfo {
            id: MOCK_SERVICE_ID.to_string(),
            provider_id: Some(provider_id.to_string()),
            service_type: Some(service_type.to_string()),
            status: "Running".to_string(),
        });
        Ok(())
    }

    async fn service_stop(&self, service_id: &str) -> Result<()> {
        self.record(format!("service_stop:{}", service_id));
        self.check_auth()?;
        let mut services = self.services.lock();
        let before = services.len();
        services.retain(|s| s.id != service_id);
        if services.len() == before {
            return Err(FleetError::Conflict {
                address: self.address.lock().clone(),
                kind: ConflictKind::ServiceNotFound,
            });
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FACTORY
// ════════════════════════════════════════════════════════════════════════════

/// Hands out pre-registered [`MockNode`]s by address. Unknown addresses get
/// an unreachable node, matching a typo'd ip:port in the real world.
#[derive(Default)]
pub struct MockApiFactory {
    nodes: Mutex<std::collections::HashMap<String, Arc<MockNode>>>,
}

impl MockApiFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &str, node: Arc<MockNode>) {
        node.set_address(address);
        self.nodes.lock().insert(address.to_string(), node);
    }
}

impl NodeApiFactory for MockApiFactory {
    fn build(&self, ip: &str, port: u16) -> Arc<dyn NodeApi> {
        let address = format!("{}:{}", ip, port);
        match self.nodes.lock().get(&address) {
            Some(node) => node.clone(),
            None => MockNode::unreachable(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
