//! The diff/snapshot boundary.
//!
//! Used when the host cannot intercept property access. The tenant writes
//! straight to the real global; on activation the boundary photographs the
//! global's enumerable properties, and on deactivation it diffs against the
//! photograph, remembers the tenant's changes and puts the photograph back.
//! Only one snapshot boundary may be active at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, info};
use warden_core::{GlobalEnvironment, GlobalEnvironmentExt, PropertyKey, Result, SharedGlobal, Value};

use super::{BoundaryKind, IsolationBoundary};
use crate::context::HostContext;

/// Always tracked, even where it is not an enumerable own property.
const ALWAYS_TRACKED: &str = "clearInterval";

#[derive(Default)]
struct SnapshotState {
    /// Taken on activation, consumed on deactivation.
    snapshot: Option<IndexMap<PropertyKey, Value>>,
    modified: IndexMap<PropertyKey, Value>,
    deleted: IndexSet<PropertyKey>,
}

/// Isolation by diffing the real global.
pub struct SnapshotBoundary {
    name: String,
    ctx: Arc<HostContext>,
    global: Arc<SharedGlobal>,
    state: Mutex<SnapshotState>,
    running: AtomicBool,
}

impl SnapshotBoundary {
    pub fn new(ctx: &Arc<HostContext>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ctx: ctx.clone(),
            global: ctx.global().clone(),
            state: Mutex::new(SnapshotState::default()),
            running: AtomicBool::new(true),
        }
    }

    fn tracked_keys(&self) -> Vec<PropertyKey> {
        let mut keys = self.global.enumerable_keys();
        let always = PropertyKey::from(ALWAYS_TRACKED);
        if !keys.contains(&always) && self.global.has(&always) {
            keys.push(always);
        }
        keys
    }

    /// Keys the tenant changed during its last active period.
    pub fn modified_keys(&self) -> Vec<PropertyKey> {
        self.state.lock().modified.keys().cloned().collect()
    }
}

impl IsolationBoundary for SnapshotBoundary {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BoundaryKind {
        BoundaryKind::Snapshot
    }

    fn global(&self) -> Arc<dyn GlobalEnvironment> {
        self.global.as_env()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn activate(&self) -> Result<()> {
        let mut snapshot = IndexMap::new();
        for key in self.tracked_keys() {
            let value = self.global.get(&key)?;
            snapshot.insert(key, value);
        }

        let (modified, deleted) = {
            let mut state = self.state.lock();
            state.snapshot = Some(snapshot);
            (state.modified.clone(), state.deleted.clone())
        };

        // Replay the tenant's own changes from its previous active period.
        for (key, value) in modified {
            self.global.set(&key, value)?;
        }
        for key in deleted {
            self.global.delete(&key)?;
        }

        self.running.store(true, Ordering::Release);
        debug!("Activated snapshot boundary {}", self.name);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock();
            match state.snapshot.take() {
                Some(snapshot) => {
                    state.modified.clear();
                    state.deleted.clear();
                    snapshot
                }
                None => {
                    debug!("{} has no snapshot to restore, skipping", self.name);
                    self.running.store(false, Ordering::Release);
                    return Ok(());
                }
            }
        };

        let mut modified = IndexMap::new();
        let mut deleted = IndexSet::new();

        for key in self.tracked_keys() {
            let current = self.global.get(&key)?;
            match snapshot.get(&key) {
                Some(previous) if previous.same_value(&current) => {}
                Some(previous) => {
                    modified.insert(key.clone(), current);
                    self.global.set(&key, previous.clone())?;
                }
                None => {
                    modified.insert(key.clone(), current);
                    if !self.global.delete(&key)? {
                        debug!("{} could not remove locked global {}", self.name, key);
                    }
                }
            }
        }

        for (key, previous) in &snapshot {
            if !self.global.has_own_property(key) {
                deleted.insert(key.clone());
                self.global.set(key, previous.clone())?;
            }
        }

        if self.ctx.is_development() {
            let keys: Vec<String> = modified.keys().map(|k| k.to_string()).collect();
            info!(
                "[warden:sandbox] {} origin window restore: {:?}",
                self.name, keys
            );
        }

        {
            let mut state = self.state.lock();
            state.modified = modified;
            state.deleted = deleted;
        }
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostCapabilities;

    fn context() -> Arc<HostContext> {
        HostContext::browser(HostCapabilities {
            interception: false,
            ..HostCapabilities::default()
        })
    }

    #[test]
    fn test_round_trip_restores_and_replays() {
        let ctx = context();
        let real = ctx.global().clone();
        real.set_key("shared", "host").unwrap();

        let boundary = SnapshotBoundary::new(&ctx, "alpha");
        boundary.activate().unwrap();
        let global = boundary.global();
        global.set_key("shared", "tenant").unwrap();
        global.set_key("added", 1).unwrap();

        boundary.deactivate().unwrap();
        assert_eq!(real.get_key("shared").unwrap(), Value::from("host"));
        assert!(!real.has_key("added"));

        boundary.activate().unwrap();
        assert_eq!(real.get_key("shared").unwrap(), Value::from("tenant"));
        assert_eq!(real.get_key("added").unwrap(), Value::from(1));
        boundary.deactivate().unwrap();
    }

    #[test]
    fn test_deleted_keys_are_restored_and_replayed() {
        let ctx = context();
        let real = ctx.global().clone();
        real.set_key("legacy", true).unwrap();

        let boundary = SnapshotBoundary::new(&ctx, "alpha");
        boundary.activate().unwrap();
        real.delete_key("legacy").unwrap();

        boundary.deactivate().unwrap();
        assert_eq!(real.get_key("legacy").unwrap(), Value::from(true));

        boundary.activate().unwrap();
        assert!(!real.has_key("legacy"));
    }

    #[test]
    fn test_clear_interval_is_tracked() {
        let ctx = context();
        let real = ctx.global().clone();
        let boundary = SnapshotBoundary::new(&ctx, "alpha");
        let native = real.get_key("clearInterval").unwrap();

        boundary.activate().unwrap();
        real.set_key("clearInterval", "wrapped").unwrap();
        boundary.deactivate().unwrap();

        assert_eq!(real.get_key("clearInterval").unwrap(), native);
        assert_eq!(boundary.modified_keys(), vec![PropertyKey::from("clearInterval")]);
    }

    #[test]
    fn test_deactivate_without_activation_leaves_global_alone() {
        let ctx = context();
        let real = ctx.global().clone();
        real.set_key("shared", "host").unwrap();

        let boundary = SnapshotBoundary::new(&ctx, "alpha");
        boundary.deactivate().unwrap();

        assert!(!boundary.is_running());
        assert_eq!(real.get_key("shared").unwrap(), Value::from("host"));
        assert!(real.has_key("setTimeout"));
        assert!(boundary.modified_keys().is_empty());
    }

    #[test]
    fn test_second_deactivation_keeps_recorded_changes() {
        let ctx = context();
        let real = ctx.global().clone();
        let boundary = SnapshotBoundary::new(&ctx, "alpha");

        boundary.activate().unwrap();
        real.set_key("added", 1).unwrap();
        boundary.deactivate().unwrap();
        boundary.deactivate().unwrap();
        assert_eq!(boundary.modified_keys(), vec![PropertyKey::from("added")]);

        boundary.activate().unwrap();
        assert_eq!(real.get_key("added").unwrap(), Value::from(1));
    }
}
