//! # mystfleet-manager
//!
//! Node registry and reconciliation controller for a fleet of remote
//! gateway devices, each exposing an HTTP management API.
//!
//! | Module        | Responsibility                                         |
//! |---------------|--------------------------------------------------------|
//! | `node_api`    | transport seam: `NodeApi` trait + HTTP client/factory  |
//! | `registry`    | ordered address list + address → `NodeRecord` mapping  |
//! | `persistence` | durable registry snapshots (two JSON entries on disk)  |
//! | `session`     | `(handle, token)` acquisition and handle rebuilds      |
//! | `controller`  | add/refresh/start/stop/remove + eviction + resync      |
//! | `mock_node`   | scripted `NodeApi` for tests and dev mode              |
//! | `handlers`    | operator HTTP API (axum)                               |
//!
//! Commands are optimistic and confirmation is pull-based: after every
//! start/stop the node's real state is re-fetched and replaces the cached
//! record. Only the bearer token is ever persisted; passwords are used
//! once and dropped, and live handles are rebuilt after a restart.

pub mod controller;
pub mod handlers;
pub mod mock_node;
pub mod node_api;
pub mod persistence;
pub mod registry;
pub mod session;

pub use controller::{FleetController, RefreshOutcome};
pub use handlers::{build_router, ManagerAppState};
pub use node_api::{HttpApiFactory, NodeApi, NodeApiFactory, AUTH_USERNAME, SERVICE_TYPE};
pub use persistence::{FileRegistryStore, NullRegistryStore, PersistedRegistry, RegistryStore};
pub use registry::{NodeRecord, NodeRegistry, STATUS_STOPPED};
pub use session::SessionManager;
