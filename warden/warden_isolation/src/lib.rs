//! # Warden Isolation
//!
//! `warden_isolation` gives every tenant the illusion of owning the shared
//! global environment and reverses what it did when it deactivates.
//!
//! Key concepts:
//!
//! 1. **Host Context**: The explicit, process-scoped state every boundary
//!    shares: the real global, the running-tenant registry and the
//!    active-boundary counter.
//!
//! 2. **Isolation Boundary**: A per-tenant view of the global. Three
//!    strategies exist: the interception ("proxy") boundary, the
//!    diff/snapshot boundary for hosts without interception, and the legacy
//!    interception boundary for single-tenant compatibility mode.
//!
//! 3. **Side-Effect Patchers**: Wrappers around timers, window listeners and
//!    the router's `listen` hook that record subscriptions per tenant so
//!    they can be torn down on unmount and rebuilt on the next mount.
//!
//! 4. **Sandbox Container**: Picks a boundary for the host and sequences
//!    activation and patching around a tenant's mount and unmount.

pub mod boundary;
pub mod container;
pub mod context;
pub mod patchers;
pub mod registry;

// Re-export key types and traits for convenience
pub use boundary::{
    BoundaryKind, IsolationBoundary, LegacyBoundary, ProxyBoundary, ProxyOptions, SnapshotBoundary,
};
pub use container::{SandboxContainer, SandboxOptions};
pub use context::{HostCapabilities, HostContext};
pub use patchers::{Freer, Rebuilder};
pub use registry::{RunningTenant, RunningTenantRegistry};
