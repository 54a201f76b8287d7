//! Shared building blocks for the mystfleet workspace: the fleet error
//! taxonomy, the node state snapshots exchanged with the management API,
//! and the manager configuration loader.

pub mod config;
pub mod error;
pub mod types;

pub use config::ManagerConfig;
pub use error::{ConflictKind, FleetError};
pub use types::{
    split_address, HealthSnapshot, IdentityRef, ServiceInfo, StatsSnapshot,
};

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, FleetError>;
