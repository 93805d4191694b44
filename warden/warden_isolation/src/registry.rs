//! Running-tenant registry.
//!
//! All tenants share one call stack, so when a patched side effect runs the
//! only way to know whose code triggered it is to remember which boundary
//! was touched last. Boundaries record themselves on every access; the
//! record is cleared once per turn so code running outside a turn is
//! attributed to no tenant.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::trace;
use warden_core::GlobalRef;

/// The tenant whose isolated code is currently executing.
#[derive(Debug, Clone)]
pub struct RunningTenant {
    /// Tenant instance name.
    pub name: String,

    /// The tenant's virtual global.
    pub global: GlobalRef,
}

/// Records the currently executing tenant.
#[derive(Default)]
pub struct RunningTenantRegistry {
    current: Mutex<Option<RunningTenant>>,
    clear_pending: AtomicBool,
}

impl RunningTenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, tenant: RunningTenant) {
        *self.current.lock() = Some(tenant);
    }

    pub fn current(&self) -> Option<RunningTenant> {
        self.current.lock().clone()
    }

    pub fn clear_current(&self) {
        *self.current.lock() = None;
    }

    /// Request a clear at the end of the current turn. Only the first
    /// request in a turn is recorded; returns whether this call scheduled it.
    pub fn schedule_clear(&self) -> bool {
        !self.clear_pending.swap(true, Ordering::AcqRel)
    }

    /// Finish the current turn, running the deferred clear if one was
    /// scheduled. Returns whether a clear happened.
    pub fn end_turn(&self) -> bool {
        if self.clear_pending.swap(false, Ordering::AcqRel) {
            trace!("Clearing running tenant at end of turn");
            self.clear_current();
            true
        } else {
            false
        }
    }

    /// Record `name` as running and schedule the end-of-turn clear.
    pub fn enter(&self, name: &str, global: &GlobalRef) {
        {
            let mut current = self.current.lock();
            let same = current.as_ref().map(|t| t.name == name).unwrap_or(false);
            if !same {
                *current = Some(RunningTenant {
                    name: name.to_string(),
                    global: global.clone(),
                });
            }
        }
        self.schedule_clear();
    }
}
