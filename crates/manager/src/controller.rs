//! # Reconciliation Controller
//!
//! Orchestrates every operator-visible operation: add/authenticate a node,
//! refresh one or all, start and stop the default service, remove a node.
//! Each operation computes a full target [`NodeRecord`] and performs a
//! single registry `put`, or evicts the node on an unrecoverable credential
//! failure.
//!
//! ## Reconciliation model
//!
//! Commands are optimistic: nothing is inferred from a command response.
//! After a successful (or conflict-absorbed) start/stop, the node's
//! authoritative state is re-fetched and replaces the cached record.
//! Conflicts (`start` when already running, `stop` when already stopped)
//! are the only failure class resolved internally — local and remote state
//! merely drifted, and the resync brings them back together.
//!
//! ## Per-address exclusion
//!
//! Overlapping commands on one address would race: both compute a full
//! record and the last `put` wins, silently losing the other's view. A
//! per-address `tokio::sync::Mutex` serializes add/refresh/start/stop for
//! the same node. Operations on different nodes still interleave freely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use mystfleet_common::{
    split_address, ConflictKind, FleetError, Result,
};

use crate::node_api::{NodeApi, NodeApiFactory, SERVICE_TYPE};
use crate::registry::{NodeRecord, NodeRegistry};
use crate::session::SessionManager;

/// Per-node result of a fleet-wide refresh.
pub struct RefreshOutcome {
    pub address: String,
    pub result: Result<NodeRecord>,
}

pub struct FleetController {
    registry: Arc<RwLock<NodeRegistry>>,
    sessions: SessionManager,
    /// One async mutex per address; taken by every command/refresh path.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FleetController {
    pub fn new(
        registry: Arc<RwLock<NodeRegistry>>,
        factory: Arc<dyn NodeApiFactory>,
    ) -> Self {
        let sessions = SessionManager::new(registry.clone(), factory);
        Self {
            registry,
            sessions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Read access to the shared registry, for the HTTP layer.
    pub fn registry(&self) -> Arc<RwLock<NodeRegistry>> {
        self.registry.clone()
    }

    // ────────────────────────────────────────────────────────────────
    // PUBLIC OPERATIONS
    // ────────────────────────────────────────────────────────────────

    /// Adds a node (password given) or refreshes it (password absent):
    /// acquire a session, fetch the full state, replace the registry entry.
    pub async fn add_or_update(
        &self,
        ip: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<NodeRecord> {
        let address = format!("{}:{}", ip, port);
        let lock = self.address_lock(&address);
        let _guard = lock.lock().await;
        self.sync_node(&address, ip, port, password).await
    }

    /// Pull-based resync of one registered node.
    pub async fn refresh_node(&self, address: &str) -> Result<NodeRecord> {
        let (ip, port) = split_address(address)?;
        self.add_or_update(&ip, port, None).await
    }

    /// Pull-based resync of every known node. One node's failure never
    /// aborts the others; each outcome is reported independently.
    pub async fn refresh_all(&self) -> Vec<RefreshOutcome> {
        let addresses = self.registry.read().list();
        let mut outcomes = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self.refresh_node(&address).await;
            if let Err(e) = &result {
                warn!("refresh failed for {}: {}", address, e);
            }
            outcomes.push(RefreshOutcome { address, result });
        }
        outcomes
    }

    /// Starts the node's default service on its operator identity, then
    /// resyncs. An "already running" conflict counts as success.
    pub async fn start_node(&self, address: &str) -> Result<NodeRecord> {
        let lock = self.address_lock(address);
        let _guard = lock.lock().await;

        let provider_id = {
            let registry = self.registry.read();
            let record = registry
                .get(address)
                .ok_or_else(|| FleetError::UnknownNode(address.to_string()))?;
            record
                .identities
                .first()
                .map(|i| i.id.clone())
                .ok_or_else(|| FleetError::Transport {
                    address: address.to_string(),
                    reason: "no identity available for service start".to_string(),
                })?
        };
        let (ip, port) = split_address(address)?;
        let (handle, _token) = self.sessions.acquire(address, &ip, port, None).await?;

        match handle.service_start(&provider_id, SERVICE_TYPE).await {
            Ok(()) => {
                info!("service start issued on {} (provider {})", address, provider_id);
            }
            Err(FleetError::Conflict {
                kind: ConflictKind::AlreadyRunning,
                ..
            }) => {
                // Remote got there first; the resync below reconciles.
                info!("service already running on {}", address);
            }
            Err(e @ FleetError::Unauthorized { .. }) => {
                self.evict(address);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        self.sync_node(address, &ip, port, None).await
    }

    /// Stops the node's running service, then resyncs. A locally empty
    /// service list or a "service not found" conflict counts as success.
    pub async fn stop_node(&self, address: &str) -> Result<NodeRecord> {
        let lock = self.address_lock(address);
        let _guard = lock.lock().await;

        let service_id = {
            let registry = self.registry.read();
            let record = registry
                .get(address)
                .ok_or_else(|| FleetError::UnknownNode(address.to_string()))?;
            record.services.first().map(|s| s.id.clone())
        };
        let (ip, port) = split_address(address)?;
        let (handle, _token) = self.sessions.acquire(address, &ip, port, None).await?;

        match service_id {
            // Local view already says stopped; the resync settles any drift.
            None => {}
            Some(service_id) => match handle.service_stop(&service_id).await {
                Ok(()) => {
                    info!("service stop issued on {} (service {})", address, service_id);
                }
                Err(FleetError::Conflict {
                    kind: ConflictKind::ServiceNotFound,
                    ..
                }) => {
                    info!("service already gone on {}", address);
                }
                Err(e @ FleetError::Unauthorized { .. }) => {
                    self.evict(address);
                    return Err(e);
                }
                Err(e) => return Err(e),
            },
        }

        self.sync_node(address, &ip, port, None).await
    }

    /// Removes a node from the registry.
    pub fn remove_node(&self, address: &str) -> Result<()> {
        let removed = self.registry.write().remove(address);
        self.locks.lock().remove(address);
        if removed {
            info!("node {} removed", address);
            Ok(())
        } else {
            Err(FleetError::UnknownNode(address.to_string()))
        }
    }

    // ────────────────────────────────────────────────────────────────
    // INTERNAL
    // ────────────────────────────────────────────────────────────────

    /// Full fetch-and-replace for one node. Caller holds the address lock.
    async fn sync_node(
        &self,
        address: &str,
        ip: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<NodeRecord> {
        let (handle, token) = self.sessions.acquire(address, ip, port, password).await?;

        match self.fetch_record(address, &handle, token).await {
            Ok(record) => {
                self.registry.write().put(record.clone());
                info!(
                    "node {} synced: status {}, {} identities",
                    address,
                    record.status(),
                    record.identities.len()
                );
                Ok(record)
            }
            Err(e @ FleetError::Unauthorized { .. }) => {
                self.evict(address);
                Err(e)
            }
            // No partial record is written; last-known state stands.
            Err(e) => Err(e),
        }
    }

    /// Sequentially fetches the node's full state on one handle.
    async fn fetch_record(
        &self,
        address: &str,
        handle: &Arc<dyn NodeApi>,
        token: String,
    ) -> Result<NodeRecord> {
        let health = handle.health_check().await?;
        let stats = handle.session_stats().await?;
        let identities = handle.identities().await?;
        let services = handle.services().await?;
        Ok(NodeRecord {
            address: address.to_string(),
            token,
            handle: Some(handle.clone()),
            health,
            stats,
            identities,
            services,
        })
    }

    fn evict(&self, address: &str) {
        warn!("node {} rejected its credentials, evicting", address);
        self.registry.write().remove(address);
        self.locks.lock().remove(address);
    }

    fn address_lock(&self, address: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_node::{MockApiFactory, MockNode, MOCK_SERVICE_ID};
    use crate::persistence::NullRegistryStore;
    use mystfleet_common::{HealthSnapshot, IdentityRef, ServiceInfo, StatsSnapshot};

    const ADDR: &str = "10.0.0.1:4050";

    fn scenario_node() -> Arc<MockNode> {
        let node = MockNode::healthy("abc");
        node.require_password("secret");
        node.set_health(HealthSnapshot {
            uptime: 10,
            version: "1.0".to_string(),
        });
        node.set_stats(StatsSnapshot {
            count: 2,
            sum_tokens: 3_000_000_000_000_000_000,
        });
        node.set_identities(vec![IdentityRef {
            id: "idA".to_string(),
        }]);
        node
    }

    fn controller_with(node: Arc<MockNode>) -> FleetController {
        let factory = MockApiFactory::new();
        factory.register(ADDR, node);
        let registry = Arc::new(RwLock::new(NodeRegistry::new(Arc::new(
            NullRegistryStore,
        ))));
        FleetController::new(registry, Arc::new(factory))
    }

    // ──────────────────────────────────────────────────────────────────
    // ADD / UPDATE
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_add_node_scenario() {
        let controller = controller_with(scenario_node());
        let record = controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        assert_eq!(record.address, ADDR);
        assert_eq!(record.token, "abc");
        assert!(!record.token.is_empty());
        assert_eq!(record.status(), "Stopped");
        assert_eq!(record.stats.earnings_display(), "3.00");
        assert!(record.handle.is_some());
        assert_eq!(controller.registry.read().list(), vec![ADDR]);
    }

    #[tokio::test]
    async fn test_add_bad_password_not_registered() {
        let controller = controller_with(scenario_node());
        let err = controller
            .add_or_update("10.0.0.1", 4050, Some("wrong"))
            .await
            .expect_err("bad password");
        assert!(matches!(err, FleetError::Authentication { .. }));
        assert!(controller.registry.read().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_registry_untouched() {
        let node = scenario_node();
        let controller = controller_with(node);
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        // Unknown address builds an unreachable handle.
        let err = controller
            .add_or_update("9.9.9.9", 4048, Some("secret"))
            .await
            .expect_err("unreachable");
        assert!(matches!(err, FleetError::Authentication { .. }));
        assert_eq!(controller.registry.read().list(), vec![ADDR]);
    }

    // ──────────────────────────────────────────────────────────────────
    // EVICTION
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unauthorized_refresh_evicts() {
        let node = scenario_node();
        let controller = controller_with(node.clone());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        node.revoke_token();
        let err = controller.refresh_node(ADDR).await.expect_err("revoked");
        assert!(err.is_unauthorized());
        assert!(controller.registry.read().is_empty());

        // Surfaced exactly once: the next refresh sees an unknown node.
        let err = controller.refresh_node(ADDR).await.expect_err("gone");
        assert!(matches!(err, FleetError::UnknownNode(_)));
    }

    // ──────────────────────────────────────────────────────────────────
    // START / STOP
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_node_scenario() {
        let node = scenario_node();
        let controller = controller_with(node.clone());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        let record = controller.start_node(ADDR).await.expect("start");
        assert!(node
            .calls()
            .contains(&"service_start:idA".to_string()));
        assert_eq!(record.status(), "Running");
        assert_eq!(record.services[0].id, MOCK_SERVICE_ID);
    }

    #[tokio::test]
    async fn test_start_conflict_absorbed() {
        let node = scenario_node();
        let controller = controller_with(node.clone());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        // Remote is already running; local view is stale ("Stopped").
        node.set_services(vec![ServiceInfo {
            id: MOCK_SERVICE_ID.to_string(),
            provider_id: None,
            service_type: None,
            status: "Running".to_string(),
        }]);

        let record = controller.start_node(ADDR).await.expect("absorbed");
        assert_eq!(record.status(), "Running");
    }

    #[tokio::test]
    async fn test_stop_node_roundtrip() {
        let node = scenario_node();
        let controller = controller_with(node.clone());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");
        controller.start_node(ADDR).await.expect("start");

        let record = controller.stop_node(ADDR).await.expect("stop");
        assert_eq!(record.status(), "Stopped");
        assert!(node
            .calls()
            .contains(&format!("service_stop:{}", MOCK_SERVICE_ID)));
    }

    #[tokio::test]
    async fn test_stop_when_already_stopped() {
        let controller = controller_with(scenario_node());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        // Local services empty, remote stopped too: resync, no error.
        let record = controller.stop_node(ADDR).await.expect("stop noop");
        assert_eq!(record.status(), "Stopped");
    }

    #[tokio::test]
    async fn test_stop_conflict_absorbed() {
        let node = scenario_node();
        let controller = controller_with(node.clone());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");
        controller.start_node(ADDR).await.expect("start");

        // Remote stopped behind our back; local record still shows Running.
        node.set_services(vec![]);
        let record = controller.stop_node(ADDR).await.expect("absorbed");
        assert_eq!(record.status(), "Stopped");
    }

    #[tokio::test]
    async fn test_start_unknown_node() {
        let controller = controller_with(scenario_node());
        let err = controller.start_node(ADDR).await.expect_err("unknown");
        assert!(matches!(err, FleetError::UnknownNode(_)));
    }

    // ──────────────────────────────────────────────────────────────────
    // REFRESH ALL
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_refresh_all_idempotent() {
        let controller = controller_with(scenario_node());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        let view = |c: &FleetController| {
            serde_json::to_value(c.registry.read().records_in_order()).expect("encode")
        };

        let first = controller.refresh_all().await;
        assert!(first.iter().all(|o| o.result.is_ok()));
        let after_first = view(&controller);

        let second = controller.refresh_all().await;
        assert!(second.iter().all(|o| o.result.is_ok()));
        assert_eq!(after_first, view(&controller));
    }

    #[tokio::test]
    async fn test_refresh_all_failures_independent() {
        let good = scenario_node();
        let factory = MockApiFactory::new();
        factory.register(ADDR, good);
        let registry = Arc::new(RwLock::new(NodeRegistry::new(Arc::new(
            NullRegistryStore,
        ))));
        let controller = FleetController::new(registry, Arc::new(factory));

        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add good");
        // Seed a record for a node that is now unreachable.
        controller.registry.write().put(NodeRecord {
            address: "10.0.0.2:4050".to_string(),
            token: "stale".to_string(),
            handle: None,
            health: HealthSnapshot::default(),
            stats: StatsSnapshot::default(),
            identities: vec![],
            services: vec![],
        });

        let outcomes = controller.refresh_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        // Unreachable node stays registered in last-known state.
        assert_eq!(controller.registry.read().len(), 2);
    }

    // ──────────────────────────────────────────────────────────────────
    // PER-ADDRESS EXCLUSION
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_concurrent_starts_serialize() {
        let node = scenario_node();
        let controller = Arc::new(controller_with(node));
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");

        let a = {
            let c = controller.clone();
            tokio::spawn(async move { c.start_node(ADDR).await })
        };
        let b = {
            let c = controller.clone();
            tokio::spawn(async move { c.start_node(ADDR).await })
        };
        let ra = a.await.expect("join").expect("first start");
        let rb = b.await.expect("join").expect("second start");

        // One start won, the other was absorbed as a conflict; both land
        // on the same authoritative Running state.
        assert_eq!(ra.status(), "Running");
        assert_eq!(rb.status(), "Running");
        let registry = controller.registry.read();
        assert_eq!(registry.get(ADDR).map(|r| r.status()), Some("Running"));
    }

    #[tokio::test]
    async fn test_remove_node() {
        let controller = controller_with(scenario_node());
        controller
            .add_or_update("10.0.0.1", 4050, Some("secret"))
            .await
            .expect("add");
        controller.remove_node(ADDR).expect("remove");
        assert!(controller.registry.read().is_empty());
        assert!(matches!(
            controller.remove_node(ADDR),
            Err(FleetError::UnknownNode(_))
        ));
    }
}
