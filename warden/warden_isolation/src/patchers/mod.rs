//! Side-effect patchers.
//!
//! While a tenant is mounted its timers, window listeners and router
//! subscriptions are funnelled through wrappers installed on its global.
//! Freeing a patcher tears down whatever the tenant left subscribed and
//! returns a rebuilder that re-establishes the pieces that must survive a
//! remount.

mod history_listener;
mod interval;
mod window_listener;

use std::sync::Arc;

use tracing::debug;
use warden_core::{GlobalEnvironment, Result};

pub use history_listener::{patch_history_listener, HISTORY_KEY};
pub use interval::patch_interval;
pub use window_listener::patch_window_listener;

/// Re-establishes side effects on the next mount.
pub type Rebuilder = Box<dyn FnOnce() -> Result<()> + Send>;

/// A rebuilder with nothing to do.
pub fn noop_rebuilder() -> Rebuilder {
    Box::new(|| Ok(()))
}

/// An installed patch.
pub trait Freer: Send + Sync {
    /// Patcher name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Tear down recorded subscriptions and restore the unpatched
    /// functions. Calling it again has no further effect.
    fn free(&self) -> Result<Rebuilder>;
}

/// Install the patchers that are active while a tenant is mounted.
pub fn patch_at_mounting(
    name: &str,
    global: &Arc<dyn GlobalEnvironment>,
) -> Result<Vec<Box<dyn Freer>>> {
    let freers = vec![
        patch_interval(name, global)?,
        patch_window_listener(name, global)?,
        patch_history_listener(name, global)?,
    ];
    debug!("Patched {} side effects for {}", freers.len(), name);
    Ok(freers)
}
