//! # Node Registry
//!
//! Authoritative in-memory view of the fleet: an ordered list of addresses
//! (insertion order is display order) plus the address → [`NodeRecord`]
//! mapping. Pure storage — no validation, no remote calls.
//!
//! Every mutation mirrors the full snapshot through the configured
//! [`RegistryStore`], fire-and-forget: a failed write is logged at warn and
//! never fails the logical operation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use mystfleet_common::{HealthSnapshot, IdentityRef, ServiceInfo, StatsSnapshot};

use crate::node_api::NodeApi;
use crate::persistence::{PersistedRegistry, RegistryStore};

/// Displayed status when a node has no running services.
pub const STATUS_STOPPED: &str = "Stopped";

// ════════════════════════════════════════════════════════════════════════════
// NODE RECORD
// ════════════════════════════════════════════════════════════════════════════

/// Everything known about one registered node, keyed by `address = ip:port`.
///
/// Replaced wholesale on every refresh/start/stop — operations compute a
/// full new snapshot, never a partial mutation.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable identity key, unique in the registry.
    pub address: String,
    /// Bearer credential. The only secret ever persisted; the operator
    /// password is not stored anywhere.
    pub token: String,
    /// Live connection handle. Never serialized — rehydrated records load
    /// as `None` and the session manager rebuilds on demand.
    #[serde(skip)]
    pub handle: Option<Arc<dyn NodeApi>>,
    pub health: HealthSnapshot,
    pub stats: StatsSnapshot,
    /// Index 0 is the operator identity used for service commands.
    pub identities: Vec<IdentityRef>,
    /// Emptiness is the sole signal of "stopped".
    pub services: Vec<ServiceInfo>,
}

impl NodeRecord {
    /// Displayed status: `services[0].status` when running, otherwise
    /// [`STATUS_STOPPED`].
    pub fn status(&self) -> &str {
        self.services
            .first()
            .map(|s| s.status.as_str())
            .unwrap_or(STATUS_STOPPED)
    }

    pub fn is_running(&self) -> bool {
        !self.services.is_empty()
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("address", &self.address)
            .field("has_token", &!self.token.is_empty())
            .field("has_handle", &self.handle.is_some())
            .field("health", &self.health)
            .field("stats", &self.stats)
            .field("identities", &self.identities)
            .field("services", &self.services)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ════════════════════════════════════════════════════════════════════════════

pub struct NodeRegistry {
    /// Insertion order of addresses; defines iteration/display order.
    order: Vec<String>,
    records: HashMap<String, NodeRecord>,
    store: Arc<dyn RegistryStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            order: Vec::new(),
            records: HashMap::new(),
            store,
        }
    }

    /// Rebuilds a registry from the persisted snapshot. All loaded records
    /// have `handle = None`; handles are reacquired on first use.
    pub fn rehydrate(store: Arc<dyn RegistryStore>) -> Self {
        let mut registry = Self::new(store);
        match registry.store.load() {
            Ok(Some(snapshot)) => {
                registry.order = snapshot.addresses;
                registry.records = snapshot.records;
                // An address may exist without a record (add still pending
                // when the process died); records without an address entry
                // are unreachable and dropped.
                let order = &registry.order;
                registry.records.retain(|addr, _| order.contains(addr));
            }
            Ok(None) => {}
            Err(e) => warn!("registry snapshot load failed: {}", e),
        }
        registry
    }

    pub fn get(&self, address: &str) -> Option<&NodeRecord> {
        self.records.get(address)
    }

    /// Upsert: appends the address on first insert, preserves its position
    /// on update.
    pub fn put(&mut self, record: NodeRecord) {
        let address = record.address.clone();
        if !self.order.iter().any(|a| a == &address) {
            self.order.push(address.clone());
        }
        self.records.insert(address, record);
        self.mirror();
    }

    /// Deletes the address from both the mapping and the ordered list.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, address: &str) -> bool {
        let had_record = self.records.remove(address).is_some();
        let before = self.order.len();
        self.order.retain(|a| a != address);
        let removed = had_record || self.order.len() != before;
        if removed {
            self.mirror();
        }
        removed
    }

    /// Ordered sequence of known addresses.
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Records in display order. Addresses whose fetch is still pending
    /// (no record yet) are skipped.
    pub fn records_in_order(&self) -> Vec<NodeRecord> {
        self.order
            .iter()
            .filter_map(|a| self.records.get(a).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Best-effort persistence of the full snapshot.
    fn mirror(&self) {
        let snapshot = PersistedRegistry {
            addresses: self.order.clone(),
            records: self.records.clone(),
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!("registry snapshot write failed: {}", e);
        }
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("order", &self.order)
            .field("records", &self.records.len())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
