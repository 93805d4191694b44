//! The interception boundary.
//!
//! Every tenant gets a private overlay seeded with the real global's locked
//! properties. Reads fall through to the real global for anything the
//! tenant has not shadowed; writes land in the overlay. Only the escape keys
//! ever reach the real global, and those are restored once the last running
//! boundary deactivates. Several proxy boundaries can be active at once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use warden_core::global::{FRAME_KEYS, SELF_REFERENCE_KEYS};
use warden_core::{
    Function, GlobalEnvironment, GlobalRef, PropertyDescriptor, PropertyKey, Prototype, Result,
    Value,
};

use super::globals::{
    is_escape_key, is_native_global, is_scoped_global, BINDS_TO_NATIVE_GLOBAL, OVERWRITTEN_GLOBALS,
};
use super::rebind::RebindCache;
use super::{BoundaryKind, IsolationBoundary};
use crate::context::HostContext;

/// Options for a proxy boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyOptions {
    /// Skip the overlay for built-ins nobody shadows, and let the document
    /// be replaced through [`IsolationBoundary::patch_document`].
    pub speedy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptorOrigin {
    Overlay,
    Real,
}

/// The virtual global handed to tenant code.
struct ProxyWindow {
    name: String,
    ctx: Arc<HostContext>,
    real: Arc<dyn GlobalEnvironment>,
    real_ref: GlobalRef,
    native_ref: GlobalRef,
    top_level: bool,
    overlay: Mutex<IndexMap<PropertyKey, PropertyDescriptor>>,
    with_getter: HashSet<PropertyKey>,
    updated: Mutex<IndexSet<PropertyKey>>,
    origins: Mutex<HashMap<PropertyKey, DescriptorOrigin>>,
    running: AtomicBool,
    latest_set: Mutex<Option<PropertyKey>>,
    speedy: bool,
    rebinds: RebindCache,
    document: Mutex<Option<Value>>,
    has_own_property: Function,
    self_ref: GlobalRef,
}

/// Isolation through property interception.
pub struct ProxyBoundary {
    window: Arc<ProxyWindow>,
}

impl ProxyBoundary {
    /// Create a running boundary for `name`.
    pub fn new(ctx: &Arc<HostContext>, name: &str, options: ProxyOptions) -> Self {
        let real_global = ctx.global().clone();
        let real = real_global.as_env();
        let real_ref = real.as_global_ref();
        let top_level = real_global.is_top_level();
        let native_ref = if top_level {
            real_ref.clone()
        } else {
            match real.get(&PropertyKey::from("top")) {
                Ok(Value::Global(top)) => top,
                _ => real_ref.clone(),
            }
        };

        let (overlay, with_getter) = seed_overlay(real.as_ref(), options.speedy);

        let window = Arc::new_cyclic(|weak: &Weak<ProxyWindow>| {
            let env: Weak<dyn GlobalEnvironment> = weak.clone();
            let self_ref = GlobalRef::new(env, name);

            ProxyWindow {
                name: name.to_string(),
                ctx: ctx.clone(),
                real,
                real_ref,
                native_ref,
                top_level,
                overlay: Mutex::new(overlay),
                with_getter,
                updated: Mutex::new(IndexSet::new()),
                origins: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
                latest_set: Mutex::new(None),
                speedy: options.speedy,
                rebinds: RebindCache::new(),
                document: Mutex::new(None),
                has_own_property: has_own_property_for(weak.clone()),
                self_ref,
            }
        });

        let active = ctx.boundary_started();
        debug!("Created proxy boundary for {} ({} active)", name, active);

        Self { window }
    }

    /// Keys the tenant has written since creation.
    pub fn updated_keys(&self) -> Vec<PropertyKey> {
        self.window.updated.lock().iter().cloned().collect()
    }
}

/// Copy the real global's non-configurable properties into a fresh overlay.
/// Self and frame references become configurable and writable so the
/// overlay can answer for them; in speedy mode `document` does too.
fn seed_overlay(
    real: &dyn GlobalEnvironment,
    speedy: bool,
) -> (IndexMap<PropertyKey, PropertyDescriptor>, HashSet<PropertyKey>) {
    let mut overlay = IndexMap::new();
    let mut with_getter = HashSet::new();

    for key in real.own_keys() {
        let mut descriptor = match real.get_own_property_descriptor(&key) {
            Some(d) if !d.is_configurable() => d,
            _ => continue,
        };

        let k = key.as_str();
        let unlocked = SELF_REFERENCE_KEYS.contains(&k)
            || FRAME_KEYS.contains(&k)
            || (speedy && k == "document");
        if unlocked {
            descriptor.set_configurable(true);
            descriptor.set_writable(true);
        }
        if descriptor.is_accessor() {
            with_getter.insert(key.clone());
        }
        overlay.insert(key, descriptor);
    }

    (overlay, with_getter)
}

/// `hasOwnProperty` as seen through the boundary: called on the boundary it
/// checks both the overlay and the real global.
fn has_own_property_for(window: Weak<ProxyWindow>) -> Function {
    Function::new("hasOwnProperty", move |this, args| {
        let key = PropertyKey::from(args.first().map(|v| v.to_string()).unwrap_or_default());
        let found = match this {
            Value::Global(g) => match window.upgrade() {
                Some(w) if g.ptr_eq(&w.self_ref) => {
                    w.overlay.lock().contains_key(&key) || w.real.has_own_property(&key)
                }
                _ => g.resolve()?.has_own_property(&key),
            },
            Value::Object(o) => o.has(key.as_str()),
            Value::Function(f) => f.properties().has(key.as_str()),
            _ => false,
        };
        Ok(Value::Bool(found))
    })
}

impl ProxyWindow {
    fn this_value(&self) -> Value {
        Value::Global(self.self_ref.clone())
    }

    fn register_running(&self) {
        if self.running.load(Ordering::Acquire) {
            self.ctx.registry().enter(&self.name, &self.self_ref);
        }
    }

    fn is_escape(&self, key: &str) -> bool {
        is_escape_key(key, self.ctx.is_development())
    }

    fn read_descriptor(&self, descriptor: PropertyDescriptor) -> Result<Value> {
        match descriptor {
            PropertyDescriptor::Data { value, .. } => Ok(value),
            PropertyDescriptor::Accessor { get: Some(getter), .. } => {
                getter.call(&self.this_value(), &[])
            }
            PropertyDescriptor::Accessor { get: None, .. } => Ok(Value::Undefined),
        }
    }

    fn write_overlay(&self, key: &PropertyKey, value: Value) -> Result<()> {
        let setter = {
            let mut overlay = self.overlay.lock();
            match overlay.get_mut(key) {
                Some(PropertyDescriptor::Data {
                    value: slot,
                    writable,
                    ..
                }) => {
                    if *writable {
                        *slot = value;
                    } else {
                        debug!("{} ignored write to read-only {}", self.name, key);
                    }
                    return Ok(());
                }
                Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => setter.clone(),
                Some(PropertyDescriptor::Accessor { set: None, .. }) => return Ok(()),
                None => {
                    match self.real.get_own_property_descriptor(key) {
                        Some(real) if real.is_writable() || real.has_setter() => {
                            overlay.insert(
                                key.clone(),
                                PropertyDescriptor::Data {
                                    value,
                                    writable: true,
                                    enumerable: real.is_enumerable(),
                                    configurable: real.is_configurable(),
                                },
                            );
                        }
                        Some(_) => debug!("{} ignored write to read-only global {}", self.name, key),
                        None => {
                            overlay.insert(key.clone(), PropertyDescriptor::data(value));
                        }
                    }
                    return Ok(());
                }
            }
        };
        setter.call(&self.this_value(), &[value])?;
        Ok(())
    }

    fn restore_escaped(&self) -> Result<()> {
        for (key, previous) in self.ctx.take_escaped() {
            match previous {
                Some(descriptor) => {
                    self.real.define_property(&key, descriptor)?;
                }
                None => {
                    self.real.delete(&key)?;
                }
            }
        }
        Ok(())
    }
}

impl GlobalEnvironment for ProxyWindow {
    fn label(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &PropertyKey) -> Result<Value> {
        self.register_running();
        let k = key.as_str();

        if SELF_REFERENCE_KEYS.contains(&k) {
            return Ok(self.this_value());
        }
        if FRAME_KEYS.contains(&k) {
            return if self.top_level {
                Ok(self.this_value())
            } else {
                self.real.get(key)
            };
        }
        if k == "hasOwnProperty" {
            return Ok(Value::Function(self.has_own_property.clone()));
        }
        if k == "document" {
            if let Some(document) = self.document.lock().clone() {
                return Ok(document);
            }
        }
        if self.is_escape(k) {
            return self.real.get(key);
        }
        if self.speedy && is_scoped_global(k) && !self.overlay.lock().contains_key(key) {
            return self.real.get(key);
        }

        let shadowed = if self.with_getter.contains(key) {
            None
        } else {
            self.overlay.lock().get(key).cloned()
        };
        let (value, frozen) = match shadowed {
            Some(descriptor) => {
                let frozen = descriptor.is_frozen();
                (self.read_descriptor(descriptor)?, frozen)
            }
            None => {
                let frozen = self
                    .real
                    .get_own_property_descriptor(key)
                    .map(|d| d.is_frozen())
                    .unwrap_or(false);
                (self.real.get(key)?, frozen)
            }
        };

        if frozen {
            return Ok(value);
        }
        if BINDS_TO_NATIVE_GLOBAL.contains(&k) {
            return Ok(self.rebinds.rebind(&self.native_ref, value));
        }
        if is_native_global(k) {
            return Ok(self.rebinds.rebind(&self.real_ref, value));
        }
        Ok(value)
    }

    fn set(&self, key: &PropertyKey, value: Value) -> Result<bool> {
        if !self.running.load(Ordering::Acquire) {
            warn!(
                "Tenant {} set {} after its boundary was deactivated; ignored",
                self.name, key
            );
            return Ok(true);
        }
        self.register_running();

        if self.is_escape(key.as_str()) {
            self.ctx
                .record_escape(key, || self.real.get_own_property_descriptor(key));
            self.real.set(key, value)?;
        } else {
            self.write_overlay(key, value)?;
        }

        self.updated.lock().insert(key.clone());
        *self.latest_set.lock() = Some(key.clone());
        Ok(true)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        let k = key.as_str();
        OVERWRITTEN_GLOBALS.contains(&k)
            || is_scoped_global(k)
            || self.overlay.lock().contains_key(key)
            || self.real.has(key)
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool> {
        self.register_running();
        let removed = {
            let mut overlay = self.overlay.lock();
            match overlay.get(key) {
                Some(d) if d.is_configurable() => overlay.shift_remove(key).is_some(),
                _ => false,
            }
        };
        if removed {
            self.updated.lock().shift_remove(key);
        }
        Ok(true)
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        let mut keys: IndexSet<PropertyKey> = self.real.own_keys().into_iter().collect();
        keys.extend(self.overlay.lock().keys().cloned());
        keys.into_iter().collect()
    }

    fn get_own_property_descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        if let Some(descriptor) = self.overlay.lock().get(key).cloned() {
            self.origins
                .lock()
                .insert(key.clone(), DescriptorOrigin::Overlay);
            return Some(descriptor);
        }

        let mut descriptor = self.real.get_own_property_descriptor(key)?;
        self.origins.lock().insert(key.clone(), DescriptorOrigin::Real);
        // A property the overlay does not own must be reported configurable.
        descriptor.set_configurable(true);
        Some(descriptor)
    }

    fn define_property(&self, key: &PropertyKey, descriptor: PropertyDescriptor) -> Result<bool> {
        let origin = self.origins.lock().get(key).copied();
        if origin == Some(DescriptorOrigin::Real) {
            return self.real.define_property(key, descriptor);
        }

        let mut overlay = self.overlay.lock();
        match overlay.get(key) {
            Some(existing) if !existing.is_configurable() => Ok(false),
            _ => {
                overlay.insert(key.clone(), descriptor);
                Ok(true)
            }
        }
    }

    fn get_prototype_of(&self) -> Option<Prototype> {
        self.real.get_prototype_of()
    }

    fn as_global_ref(&self) -> GlobalRef {
        self.self_ref.clone()
    }
}

impl IsolationBoundary for ProxyBoundary {
    fn name(&self) -> &str {
        &self.window.name
    }

    fn kind(&self) -> BoundaryKind {
        BoundaryKind::Proxy
    }

    fn global(&self) -> Arc<dyn GlobalEnvironment> {
        self.window.clone()
    }

    fn is_running(&self) -> bool {
        self.window.running.load(Ordering::Acquire)
    }

    fn activate(&self) -> Result<()> {
        if !self.window.running.swap(true, Ordering::AcqRel) {
            let active = self.window.ctx.boundary_started();
            debug!("Activated proxy boundary {} ({} active)", self.window.name, active);
        }
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        let window = &self.window;
        if window.ctx.is_development() {
            let updated: Vec<String> = window.updated.lock().iter().map(|k| k.to_string()).collect();
            info!(
                "[warden:sandbox] {} modified global properties restore: {:?}",
                window.name, updated
            );
        }

        if window.running.swap(false, Ordering::AcqRel) {
            let remaining = window.ctx.boundary_stopped();
            if remaining == 0 {
                window.restore_escaped()?;
            }
        }
        Ok(())
    }

    fn latest_set_key(&self) -> Option<PropertyKey> {
        self.window.latest_set.lock().clone()
    }

    fn patch_document(&self, document: Value) {
        *self.window.document.lock() = Some(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostCapabilities;
    use warden_core::GlobalEnvironmentExt;

    fn context() -> Arc<HostContext> {
        HostContext::browser(HostCapabilities::default())
    }

    #[test]
    fn test_writes_stay_in_overlay() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();

        global.set_key("count", 1).unwrap();
        assert_eq!(global.get_key("count").unwrap(), Value::from(1));
        assert!(!ctx.global().has_key("count"));
        assert_eq!(boundary.latest_set_key().unwrap().as_str(), "count");
    }

    #[test]
    fn test_self_references_resolve_to_boundary() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();

        for key in ["window", "self", "globalThis", "top", "parent"] {
            let value = global.get_key(key).unwrap();
            assert!(value.as_global().unwrap().refers_to(&global), "{key}");
        }
    }

    #[test]
    fn test_native_functions_are_rebound() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();
        let tick = Function::new("tick", |_this, _args| Ok(Value::Undefined));

        global
            .call_method("setTimeout", &[Value::Function(tick), Value::from(5)])
            .unwrap();
        assert_eq!(ctx.host().active_timers().len(), 1);

        let first = global.get_key("setTimeout").unwrap();
        let second = global.get_key("setTimeout").unwrap();
        assert!(first.as_function().unwrap().ptr_eq(second.as_function().unwrap()));
    }

    #[test]
    fn test_escape_keys_restored_after_last_deactivation() {
        let ctx = context();
        let a = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let b = ProxyBoundary::new(&ctx, "beta", ProxyOptions::default());

        a.global().set_key("System", "loader").unwrap();
        assert_eq!(ctx.global().get_key("System").unwrap(), Value::from("loader"));

        a.deactivate().unwrap();
        assert!(ctx.global().has_key("System"));
        b.deactivate().unwrap();
        assert!(!ctx.global().has_key("System"));
        assert_eq!(ctx.active_boundaries(), 0);
    }

    #[test]
    fn test_escape_key_keeps_host_value_across_tenants() {
        let ctx = context();
        ctx.global().set_key("System", "host").unwrap();
        let a = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let b = ProxyBoundary::new(&ctx, "beta", ProxyOptions::default());

        a.global().set_key("System", "alpha").unwrap();
        b.global().set_key("System", "beta").unwrap();
        assert_eq!(ctx.global().get_key("System").unwrap(), Value::from("beta"));

        b.deactivate().unwrap();
        assert_eq!(ctx.global().get_key("System").unwrap(), Value::from("beta"));
        a.deactivate().unwrap();
        assert_eq!(ctx.global().get_key("System").unwrap(), Value::from("host"));
    }

    #[test]
    fn test_writes_after_deactivation_are_ignored() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();

        boundary.deactivate().unwrap();
        assert!(global.set_key("late", 1).unwrap());
        assert!(!global.has_key("late"));
    }

    #[test]
    fn test_has_own_property_spans_overlay_and_real() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();
        global.set_key("mine", 1).unwrap();

        for (key, expected) in [("mine", true), ("setTimeout", true), ("missing", false)] {
            let found = global.call_method("hasOwnProperty", &[Value::from(key)]).unwrap();
            assert_eq!(found, Value::from(expected), "{key}");
        }
    }

    #[test]
    fn test_delete_only_touches_overlay() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();

        global.set_key("temp", 1).unwrap();
        global.delete_key("temp").unwrap();
        assert!(!global.has_key("temp"));

        global.delete_key("setTimeout").unwrap();
        assert!(ctx.global().has_key("setTimeout"));
        assert!(boundary.updated_keys().is_empty());
    }

    #[test]
    fn test_define_property_follows_descriptor_origin() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();
        let key = PropertyKey::from("fetch");

        let descriptor = global.get_own_property_descriptor(&key).unwrap();
        assert!(descriptor.is_configurable());
        global
            .define_property(&key, PropertyDescriptor::data("patched"))
            .unwrap();
        assert_eq!(ctx.global().get_key("fetch").unwrap(), Value::from("patched"));
    }

    #[test]
    fn test_patched_document_is_served() {
        let ctx = context();
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions { speedy: true });
        let global = boundary.global();

        let real_document = global.get_key("document").unwrap();
        assert!(real_document.as_element().unwrap().ptr_eq(ctx.document().root()));

        boundary.patch_document(Value::from("scoped document"));
        assert_eq!(global.get_key("document").unwrap(), Value::from("scoped document"));
    }
}
