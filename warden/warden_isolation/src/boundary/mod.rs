//! Isolation boundaries.
//!
//! A boundary is a tenant's view of the shared global. Whatever the strategy,
//! every boundary exposes the same small surface so the container and the
//! lifecycle orchestrator never need to know which one they hold.

mod globals;
mod legacy;
mod proxy;
mod rebind;
mod snapshot;

use std::fmt;
use std::sync::Arc;

use warden_core::{GlobalEnvironment, PropertyKey, Result, Value};

pub use globals::{
    is_native_global, is_scoped_global, BINDS_TO_NATIVE_GLOBAL, DEVELOPMENT_ESCAPE_KEYS,
    ESCAPE_KEYS, NATIVE_GLOBALS, SCOPED_GLOBALS,
};
pub use legacy::LegacyBoundary;
pub use proxy::{ProxyBoundary, ProxyOptions};
pub use rebind::RebindCache;
pub use snapshot::SnapshotBoundary;

/// Isolation strategy of a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// Writes land in a private overlay; the real global is never touched
    /// outside the escape keys.
    Proxy,

    /// Writes hit the real global and are diffed against a snapshot.
    Snapshot,

    /// Writes hit the real global through interception and are recorded
    /// for reversal. Single tenant only.
    LegacyProxy,
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryKind::Proxy => write!(f, "Proxy"),
            BoundaryKind::Snapshot => write!(f, "Snapshot"),
            BoundaryKind::LegacyProxy => write!(f, "LegacyProxy"),
        }
    }
}

/// A tenant's view of the shared global.
pub trait IsolationBoundary: Send + Sync {
    /// Tenant instance name.
    fn name(&self) -> &str;

    fn kind(&self) -> BoundaryKind;

    /// The global tenant code must be run against.
    fn global(&self) -> Arc<dyn GlobalEnvironment>;

    fn is_running(&self) -> bool;

    /// Start (or resume) isolating. Idempotent.
    fn activate(&self) -> Result<()>;

    /// Stop isolating and undo this tenant's effects on the real global.
    fn deactivate(&self) -> Result<()>;

    /// The most recent key the tenant assigned, if the strategy tracks it.
    fn latest_set_key(&self) -> Option<PropertyKey> {
        None
    }

    /// Replace the document the tenant observes. Strategies that cannot
    /// intercept reads ignore it.
    fn patch_document(&self, _document: Value) {}
}
