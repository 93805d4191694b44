//! Sandbox container.
//!
//! Owns one tenant's boundary and the side-effect patches installed while
//! the tenant is mounted. The lifecycle orchestrator only ever calls
//! [`SandboxContainer::mount`] and [`SandboxContainer::unmount`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use warden_core::{GlobalEnvironment, Result};

use crate::boundary::{
    BoundaryKind, IsolationBoundary, LegacyBoundary, ProxyBoundary, ProxyOptions, SnapshotBoundary,
};
use crate::context::HostContext;
use crate::patchers::{patch_at_mounting, Freer, Rebuilder};

/// How a tenant's boundary should be built.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxOptions {
    /// Single-tenant compatibility mode: writes reach the real global.
    pub loose: bool,

    /// Speedy mode for the proxy boundary.
    pub speedy: bool,
}

/// A tenant's boundary plus its mount-time patches.
pub struct SandboxContainer {
    boundary: Arc<dyn IsolationBoundary>,
    mounting_freers: Mutex<Vec<Box<dyn Freer>>>,
    rebuilders: Mutex<Vec<Rebuilder>>,
}

impl SandboxContainer {
    /// Pick a boundary for the host: interception hosts get the proxy (or
    /// the legacy boundary when `loose`), everything else the snapshot.
    pub fn create(ctx: &Arc<HostContext>, name: &str, options: SandboxOptions) -> Self {
        let boundary: Arc<dyn IsolationBoundary> = if ctx.capabilities().interception {
            if options.loose {
                Arc::new(LegacyBoundary::new(ctx, name))
            } else {
                Arc::new(ProxyBoundary::new(
                    ctx,
                    name,
                    ProxyOptions {
                        speedy: options.speedy,
                    },
                ))
            }
        } else {
            Arc::new(SnapshotBoundary::new(ctx, name))
        };

        debug!("Created {} boundary for {}", boundary.kind(), name);
        Self::with_boundary(boundary)
    }

    pub fn with_boundary(boundary: Arc<dyn IsolationBoundary>) -> Self {
        Self {
            boundary,
            mounting_freers: Mutex::new(Vec::new()),
            rebuilders: Mutex::new(Vec::new()),
        }
    }

    pub fn boundary(&self) -> &Arc<dyn IsolationBoundary> {
        &self.boundary
    }

    pub fn kind(&self) -> BoundaryKind {
        self.boundary.kind()
    }

    /// The global tenant code runs against.
    pub fn global(&self) -> Arc<dyn GlobalEnvironment> {
        self.boundary.global()
    }

    /// Activate the boundary, install the mount-time patches, then replay
    /// the subscriptions dropped at the previous unmount.
    pub fn mount(&self) -> Result<()> {
        self.boundary.activate()?;

        let freers = patch_at_mounting(self.boundary.name(), &self.boundary.global())?;
        *self.mounting_freers.lock() = freers;

        let rebuilders = std::mem::take(&mut *self.rebuilders.lock());
        for rebuild in rebuilders {
            rebuild()?;
        }

        info!("Mounted sandbox for {}", self.boundary.name());
        Ok(())
    }

    /// Free every patch, keep the rebuilders for the next mount, then
    /// deactivate the boundary.
    pub fn unmount(&self) -> Result<()> {
        let freers = std::mem::take(&mut *self.mounting_freers.lock());
        let mut rebuilders = Vec::with_capacity(freers.len());
        for freer in &freers {
            debug!("Freeing {} patch of {}", freer.name(), self.boundary.name());
            rebuilders.push(freer.free()?);
        }
        *self.rebuilders.lock() = rebuilders;

        self.boundary.deactivate()?;
        info!("Unmounted sandbox for {}", self.boundary.name());
        Ok(())
    }
}
