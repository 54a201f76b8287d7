//! # Fleet Error Taxonomy
//!
//! Every fallible operation in the workspace returns [`FleetError`].
//! The variants map one-to-one onto the propagation policy:
//!
//! | Variant          | Handling                                          |
//! |------------------|---------------------------------------------------|
//! | `Authentication` | surfaced to the operator; node not registered     |
//! | `Unauthorized`   | node evicted from the registry; operator told to re-add |
//! | `Conflict`       | absorbed internally via resynchronization         |
//! | `Transport`      | surfaced verbatim; node left in last-known state  |
//! | `UnknownNode`    | usage error, surfaced immediately                 |
//! | `InvalidAddress` | usage error, surfaced immediately                 |
//! | `Config`         | startup only                                      |
//! | `Persistence`    | logged at warn by the registry mirror; never fails an operation |
//!
//! Conflicts are structured kinds derived from HTTP status codes. Message
//! text is never parsed to classify a failure.

use thiserror::Error;

/// A command rejected only because the node's actual state already matches
/// the command's goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Start issued while the service is already running.
    AlreadyRunning,
    /// Stop issued for a service the node no longer has.
    ServiceNotFound,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::AlreadyRunning => write!(f, "service already running"),
            ConflictKind::ServiceNotFound => write!(f, "service not found"),
        }
    }
}

/// Unified error type for registry, session, controller, and transport
/// operations.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Fresh authentication failed: bad credentials or unreachable auth
    /// endpoint. The node is not registered.
    #[error("authentication failed for {address}: {reason}")]
    Authentication { address: String, reason: String },

    /// A previously valid token was rejected. The node is evicted and must
    /// be re-added by the operator.
    #[error("node {address} rejected its stored credentials; remove and re-add it")]
    Unauthorized { address: String },

    /// Local and remote state merely drifted; resolved by resync.
    #[error("conflict on {address}: {kind}")]
    Conflict { address: String, kind: ConflictKind },

    /// Network, DNS, or unexpected-status failure talking to a node.
    #[error("transport failure for {address}: {reason}")]
    Transport { address: String, reason: String },

    /// An operation referenced an address not present in the registry.
    #[error("unknown node address: {0}")]
    UnknownNode(String),

    /// An address that does not decompose into `ip:port`.
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    /// Startup configuration problem.
    #[error("config error: {0}")]
    Config(String),

    /// Registry snapshot could not be written or read.
    #[error("registry persistence failed: {0}")]
    Persistence(String),
}

impl FleetError {
    /// True when the stored credential itself was rejected and the node
    /// must be evicted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FleetError::Unauthorized { .. })
    }

    /// Returns the conflict kind when this error is an absorbed-by-resync
    /// condition.
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            FleetError::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
