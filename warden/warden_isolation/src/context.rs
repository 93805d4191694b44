//! Host context.
//!
//! Everything that would otherwise be ambient process-wide state lives here
//! and is passed explicitly: created once per host at start-up, dropped at
//! shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use warden_core::{Document, HostServices, PropertyDescriptor, PropertyKey, SharedGlobal};

use crate::registry::RunningTenantRegistry;

/// What the host environment supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Property interception is available (required by the proxy and legacy boundaries).
    pub interception: bool,

    /// Destructuring assignment is available (required by speedy mode).
    pub destructuring: bool,

    /// Shadow roots can be attached (required by strict style isolation).
    pub shadow_dom: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            interception: true,
            destructuring: true,
            shadow_dom: true,
        }
    }
}

/// Process-scoped state shared by every boundary of one host.
pub struct HostContext {
    global: Arc<SharedGlobal>,
    host: Arc<HostServices>,
    document: Document,
    registry: RunningTenantRegistry,
    active_boundaries: AtomicUsize,
    /// Escape keys written through to the real global, with the descriptor
    /// each had before the first write. Shared by every proxy boundary.
    escaped: Mutex<IndexMap<PropertyKey, Option<PropertyDescriptor>>>,
    capabilities: HostCapabilities,
    development: bool,
}

impl HostContext {
    /// A context around a fresh browser-like global.
    pub fn browser(capabilities: HostCapabilities) -> Arc<Self> {
        let host = HostServices::new();
        let document = Document::new();
        let global = SharedGlobal::browser(&host, &document);
        Self::with_global(global, host, document, capabilities)
    }

    /// A context around an existing global.
    pub fn with_global(
        global: Arc<SharedGlobal>,
        host: Arc<HostServices>,
        document: Document,
        capabilities: HostCapabilities,
    ) -> Arc<Self> {
        Arc::new(Self {
            global,
            host,
            document,
            registry: RunningTenantRegistry::new(),
            active_boundaries: AtomicUsize::new(0),
            escaped: Mutex::new(IndexMap::new()),
            capabilities,
            development: false,
        })
    }

    /// Same context with development diagnostics (and the development
    /// escape keys) switched on. Must be called before any boundary exists.
    pub fn in_development(self: Arc<Self>) -> Arc<Self> {
        match Arc::try_unwrap(self) {
            Ok(mut ctx) => {
                ctx.development = true;
                Arc::new(ctx)
            }
            Err(shared) => shared,
        }
    }

    pub fn global(&self) -> &Arc<SharedGlobal> {
        &self.global
    }

    pub fn host(&self) -> &Arc<HostServices> {
        &self.host
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn registry(&self) -> &RunningTenantRegistry {
        &self.registry
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    pub fn is_development(&self) -> bool {
        self.development
    }

    /// Number of proxy boundaries currently running.
    pub fn active_boundaries(&self) -> usize {
        self.active_boundaries.load(Ordering::Acquire)
    }

    pub(crate) fn boundary_started(&self) -> usize {
        self.active_boundaries.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the number of boundaries still running.
    pub(crate) fn boundary_stopped(&self) -> usize {
        let previous = self
            .active_boundaries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Remember the descriptor `key` had before its first escaped write.
    /// Later writes, from any boundary, keep the first record.
    pub(crate) fn record_escape(
        &self,
        key: &PropertyKey,
        previous: impl FnOnce() -> Option<PropertyDescriptor>,
    ) {
        self.escaped.lock().entry(key.clone()).or_insert_with(previous);
    }

    /// Every escape record, emptied. Taken once the last boundary stops.
    pub(crate) fn take_escaped(&self) -> Vec<(PropertyKey, Option<PropertyDescriptor>)> {
        self.escaped.lock().drain(..).collect()
    }

    /// End the current turn: runs the registry's deferred clear.
    pub fn end_turn(&self) -> bool {
        self.registry.end_turn()
    }
}
