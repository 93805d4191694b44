//! The legacy interception boundary.
//!
//! Writes go straight through to the real global, but each one is recorded
//! so deactivation can put the original values back and activation can
//! replay the tenant's own values. Only valid when a single tenant is
//! mounted at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use warden_core::global::{FRAME_KEYS, SELF_REFERENCE_KEYS};
use warden_core::{
    GlobalEnvironment, GlobalRef, PropertyDescriptor, PropertyKey, Prototype, Result, Value,
};

use super::rebind::RebindCache;
use super::{BoundaryKind, IsolationBoundary};
use crate::context::HostContext;

#[derive(Default)]
struct Records {
    /// Keys the tenant introduced, with their latest value.
    added: IndexMap<PropertyKey, Value>,
    /// Pre-existing keys the tenant changed, with the value before the first change.
    original: IndexMap<PropertyKey, Value>,
    /// Everything the tenant changed; `None` marks a deletion.
    current: IndexMap<PropertyKey, Option<Value>>,
}

struct LegacyWindow {
    name: String,
    ctx: Arc<HostContext>,
    real: Arc<dyn GlobalEnvironment>,
    real_ref: GlobalRef,
    records: Mutex<Records>,
    running: AtomicBool,
    latest_set: Mutex<Option<PropertyKey>>,
    rebinds: RebindCache,
    self_ref: GlobalRef,
}

/// Record-and-revert isolation for a single tenant.
pub struct LegacyBoundary {
    window: Arc<LegacyWindow>,
}

impl LegacyBoundary {
    pub fn new(ctx: &Arc<HostContext>, name: &str) -> Self {
        let real = ctx.global().as_env();
        let real_ref = real.as_global_ref();

        let window = Arc::new_cyclic(|weak: &Weak<LegacyWindow>| {
            let env: Weak<dyn GlobalEnvironment> = weak.clone();
            LegacyWindow {
                name: name.to_string(),
                ctx: ctx.clone(),
                real,
                real_ref,
                records: Mutex::new(Records::default()),
                running: AtomicBool::new(true),
                latest_set: Mutex::new(None),
                rebinds: RebindCache::new(),
                self_ref: GlobalRef::new(env, name),
            }
        });

        Self { window }
    }
}

impl LegacyWindow {
    fn this_value(&self) -> Value {
        Value::Global(self.self_ref.clone())
    }

    /// Write a value back onto the real global, or remove the key when
    /// `value` is `None`.
    fn set_window_prop(&self, key: &PropertyKey, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => {
                let existing = self.real.get_own_property_descriptor(key);
                match existing {
                    Some(d) if !d.is_configurable() => {
                        self.real.set(key, value)?;
                    }
                    _ => {
                        let enumerable = existing.map(|d| d.is_enumerable()).unwrap_or(true);
                        self.real.define_property(
                            key,
                            PropertyDescriptor::Data {
                                value,
                                writable: true,
                                enumerable,
                                configurable: true,
                            },
                        )?;
                    }
                }
            }
            None => {
                self.real.delete(key)?;
            }
        }
        Ok(())
    }

    /// Record a change. `original` is the value before it, `value` the value
    /// after; `None` for `value` marks a deletion.
    fn record(&self, key: &PropertyKey, original: Value, existed: bool, value: Option<Value>) {
        let mut records = self.records.lock();
        let tenant_added = records.added.contains_key(key);
        // A key the tenant deleted and sets again is still a host key.
        let host_key = records.original.contains_key(key);

        match &value {
            Some(v) if (!existed && !host_key) || tenant_added => {
                records.added.insert(key.clone(), v.clone());
            }
            Some(_) => {
                if !records.original.contains_key(key) {
                    records.original.insert(key.clone(), original);
                }
            }
            None if tenant_added => {
                records.added.shift_remove(key);
                records.current.shift_remove(key);
                return;
            }
            None => {
                if !records.original.contains_key(key) {
                    records.original.insert(key.clone(), original);
                }
            }
        }
        records.current.insert(key.clone(), value);
    }

    fn warn_inactive(&self, action: &str, key: &PropertyKey) {
        warn!(
            "Tenant {} tried to {} {} after its boundary was deactivated; ignored",
            self.name, action, key
        );
    }
}

impl GlobalEnvironment for LegacyWindow {
    fn label(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &PropertyKey) -> Result<Value> {
        let k = key.as_str();
        if SELF_REFERENCE_KEYS.contains(&k) || FRAME_KEYS.contains(&k) {
            return Ok(self.this_value());
        }
        let value = self.real.get(key)?;
        Ok(self.rebinds.rebind(&self.real_ref, value))
    }

    fn set(&self, key: &PropertyKey, value: Value) -> Result<bool> {
        if !self.running.load(Ordering::Acquire) {
            self.warn_inactive("set", key);
            return Ok(true);
        }
        self.ctx.registry().enter(&self.name, &self.self_ref);

        let existed = self.real.has_own_property(key);
        let original = self.real.get(key)?;
        self.record(key, original, existed, Some(value.clone()));
        self.real.set(key, value)?;
        *self.latest_set.lock() = Some(key.clone());
        Ok(true)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        self.real.has(key)
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool> {
        if !self.running.load(Ordering::Acquire) {
            self.warn_inactive("delete", key);
            return Ok(true);
        }
        if !self.real.has_own_property(key) {
            return Ok(true);
        }

        let original = self.real.get(key)?;
        let deleted = self.real.delete(key)?;
        if deleted {
            self.record(key, original, true, None);
        }
        Ok(deleted)
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        self.real.own_keys()
    }

    fn get_own_property_descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let mut descriptor = self.real.get_own_property_descriptor(key)?;
        descriptor.set_configurable(true);
        Some(descriptor)
    }

    fn define_property(&self, key: &PropertyKey, descriptor: PropertyDescriptor) -> Result<bool> {
        if !self.running.load(Ordering::Acquire) {
            self.warn_inactive("define", key);
            return Ok(true);
        }
        self.ctx.registry().enter(&self.name, &self.self_ref);

        let existed = self.real.has_own_property(key);
        let original = self.real.get(key)?;
        let done = self.real.define_property(key, descriptor)?;
        if done {
            let value = self.real.get(key)?;
            self.record(key, original, existed, Some(value));
        }
        Ok(done)
    }

    fn get_prototype_of(&self) -> Option<Prototype> {
        self.real.get_prototype_of()
    }

    fn as_global_ref(&self) -> GlobalRef {
        self.self_ref.clone()
    }
}

impl IsolationBoundary for LegacyBoundary {
    fn name(&self) -> &str {
        &self.window.name
    }

    fn kind(&self) -> BoundaryKind {
        BoundaryKind::LegacyProxy
    }

    fn global(&self) -> Arc<dyn GlobalEnvironment> {
        self.window.clone()
    }

    fn is_running(&self) -> bool {
        self.window.running.load(Ordering::Acquire)
    }

    fn activate(&self) -> Result<()> {
        let window = &self.window;
        if !window.running.load(Ordering::Acquire) {
            let current: Vec<_> = window.records.lock().current.clone().into_iter().collect();
            for (key, value) in current {
                window.set_window_prop(&key, value)?;
            }
        }
        window.running.store(true, Ordering::Release);
        debug!("Activated legacy boundary {}", window.name);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        let window = &self.window;
        let (original, added) = {
            let records = window.records.lock();
            (
                records.original.clone(),
                records.added.keys().cloned().collect::<Vec<_>>(),
            )
        };

        if window.ctx.is_development() {
            let keys: Vec<String> = original
                .keys()
                .chain(added.iter())
                .map(|k| k.to_string())
                .collect();
            info!(
                "[warden:sandbox] {} modified global properties restore: {:?}",
                window.name, keys
            );
        }

        for (key, value) in original {
            window.set_window_prop(&key, Some(value))?;
        }
        for key in added {
            window.set_window_prop(&key, None)?;
        }

        window.running.store(false, Ordering::Release);
        Ok(())
    }

    fn latest_set_key(&self) -> Option<PropertyKey> {
        self.window.latest_set.lock().clone()
    }
}
