//! The real shared global.
//!
//! One `SharedGlobal` exists per host. Every tenant ultimately reads from and
//! (through escape keys or the fallback boundaries) writes to it, so it is
//! the object whose observable state isolation must preserve.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::dom::Document;
use crate::error::{EnvironmentError, Result};
use crate::host::{native_functions, HostServices};
use crate::traits::{GlobalEnvironment, GlobalRef, Prototype};
use crate::value::{Function, PropertyDescriptor, PropertyKey, Value};

/// Keys through which a global refers to itself.
pub const SELF_REFERENCE_KEYS: [&str; 3] = ["window", "self", "globalThis"];

/// Keys through which a global refers to the frame above it.
pub const FRAME_KEYS: [&str; 2] = ["top", "parent"];

/// The real, shared global object.
pub struct SharedGlobal {
    label: String,
    properties: Mutex<IndexMap<PropertyKey, PropertyDescriptor>>,
    prototype: Prototype,
    self_ref: GlobalRef,
}

impl SharedGlobal {
    /// A bare top-level global holding only its self references.
    pub fn new() -> Arc<Self> {
        Self::build("window", None)
    }

    /// A global nested under `parent`, like an iframe's window. Its `top` and
    /// `parent` point at `parent` rather than at itself.
    pub fn nested(parent: GlobalRef) -> Arc<Self> {
        Self::build("frame", Some(parent))
    }

    /// A browser-like top-level global: self references, an accessor-backed
    /// `document`, and native timer, listener and fetch functions bound to
    /// `host`.
    pub fn browser(host: &Arc<HostServices>, document: &Document) -> Arc<Self> {
        let global = Self::new();
        for (key, descriptor) in native_functions(host, &global.self_ref) {
            global.properties.lock().insert(key, descriptor);
        }

        let root = document.root().clone();
        let getter = Function::new("get document", move |_this, _args| {
            Ok(Value::Element(root.clone()))
        });
        global.properties.lock().insert(
            PropertyKey::from("document"),
            PropertyDescriptor::Accessor {
                get: Some(getter),
                set: None,
                enumerable: true,
                configurable: false,
            },
        );
        global
    }

    fn build(label: &str, parent: Option<GlobalRef>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SharedGlobal>| {
            let weak: Weak<dyn GlobalEnvironment> = weak.clone();
            let self_ref = GlobalRef::new(weak, label);

            let mut properties = IndexMap::new();
            for key in SELF_REFERENCE_KEYS {
                properties.insert(
                    PropertyKey::from(key),
                    PropertyDescriptor::data_frozen(Value::Global(self_ref.clone())),
                );
            }
            let frame = parent.unwrap_or_else(|| self_ref.clone());
            for key in FRAME_KEYS {
                properties.insert(
                    PropertyKey::from(key),
                    PropertyDescriptor::data_frozen(Value::Global(frame.clone())),
                );
            }

            SharedGlobal {
                label: label.to_string(),
                properties: Mutex::new(properties),
                prototype: Prototype::new("Window"),
                self_ref,
            }
        })
    }

    /// Whether this global is the outermost frame.
    pub fn is_top_level(&self) -> bool {
        matches!(
            self.properties.lock().get("parent").and_then(|d| d.value().cloned()),
            Some(Value::Global(g)) if g.ptr_eq(&self.self_ref)
        )
    }

    /// This global as a trait object.
    pub fn as_env(self: &Arc<Self>) -> Arc<dyn GlobalEnvironment> {
        self.clone()
    }

    /// The value of every enumerable own property, reading accessors.
    pub fn enumerable_snapshot(&self) -> Result<IndexMap<PropertyKey, Value>> {
        let keys: Vec<PropertyKey> = self
            .properties
            .lock()
            .iter()
            .filter(|(_, d)| d.is_enumerable())
            .map(|(k, _)| k.clone())
            .collect();

        let mut snapshot = IndexMap::with_capacity(keys.len());
        for key in keys {
            let value = self.get(&key)?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    fn this_value(&self) -> Value {
        Value::Global(self.self_ref.clone())
    }
}

impl GlobalEnvironment for SharedGlobal {
    fn label(&self) -> &str {
        &self.label
    }

    fn get(&self, key: &PropertyKey) -> Result<Value> {
        let descriptor = self.properties.lock().get(key).cloned();
        match descriptor {
            Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                getter.call(&self.this_value(), &[])
            }
            Some(PropertyDescriptor::Accessor { get: None, .. }) | None => Ok(Value::Undefined),
        }
    }

    fn set(&self, key: &PropertyKey, value: Value) -> Result<bool> {
        let setter = {
            let mut properties = self.properties.lock();
            match properties.get_mut(key) {
                Some(PropertyDescriptor::Data {
                    value: slot,
                    writable,
                    ..
                }) => {
                    if !*writable {
                        trace!("Refusing write to read-only global {}", key);
                        return Ok(false);
                    }
                    *slot = value;
                    return Ok(true);
                }
                Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => setter.clone(),
                Some(PropertyDescriptor::Accessor { set: None, .. }) => return Ok(false),
                None => {
                    properties.insert(key.clone(), PropertyDescriptor::data(value));
                    return Ok(true);
                }
            }
        };
        setter.call(&self.this_value(), &[value])?;
        Ok(true)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        self.properties.lock().contains_key(key)
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool> {
        let mut properties = self.properties.lock();
        match properties.get(key) {
            Some(descriptor) if !descriptor.is_configurable() => Ok(false),
            Some(_) => {
                properties.shift_remove(key);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn own_keys(&self) -> Vec<PropertyKey> {
        self.properties.lock().keys().cloned().collect()
    }

    fn get_own_property_descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.properties.lock().get(key).cloned()
    }

    fn define_property(&self, key: &PropertyKey, descriptor: PropertyDescriptor) -> Result<bool> {
        let mut properties = self.properties.lock();
        if let Some(existing) = properties.get_mut(key) {
            if !existing.is_configurable() {
                // A locked slot only accepts a new value, and only if writable.
                return match (existing, descriptor) {
                    (
                        PropertyDescriptor::Data {
                            value: slot,
                            writable: true,
                            ..
                        },
                        PropertyDescriptor::Data { value, .. },
                    ) => {
                        *slot = value;
                        Ok(true)
                    }
                    _ => Err(EnvironmentError::PropertyRejected {
                        action: "redefine".to_string(),
                        key: key.to_string(),
                    }
                    .into()),
                };
            }
        }
        properties.insert(key.clone(), descriptor);
        Ok(true)
    }

    fn get_prototype_of(&self) -> Option<Prototype> {
        Some(self.prototype.clone())
    }

    fn as_global_ref(&self) -> GlobalRef {
        self.self_ref.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::GlobalEnvironmentExt;

    #[test]
    fn test_self_references_point_back() {
        let global = SharedGlobal::new();
        let env = global.as_env();

        for key in SELF_REFERENCE_KEYS.iter().chain(FRAME_KEYS.iter()) {
            let value = global.get_key(key).unwrap();
            assert!(value.as_global().unwrap().refers_to(&env), "{key}");
        }
        assert!(global.is_top_level());
    }

    #[test]
    fn test_nested_global_reports_parent() {
        let top = SharedGlobal::new();
        let frame = SharedGlobal::nested(top.as_global_ref());

        assert!(!frame.is_top_level());
        let parent = frame.get_key("parent").unwrap();
        assert!(parent.as_global().unwrap().ptr_eq(&top.as_global_ref()));
    }

    #[test]
    fn test_read_only_and_non_configurable_slots() {
        let global = SharedGlobal::new();

        assert!(!global.set_key("window", 1).unwrap());
        assert!(!global.delete_key("window").unwrap());

        global.set_key("count", 1).unwrap();
        assert!(global.delete_key("count").unwrap());
        assert!(!global.has_key("count"));
    }

    #[test]
    fn test_natives_reject_foreign_receiver() {
        let host = HostServices::new();
        let global = SharedGlobal::browser(&host, &Document::new());
        let tick = Function::new("tick", |_this, _args| Ok(Value::Undefined));

        let id = global
            .call_method("setTimeout", &[Value::Function(tick.clone()), Value::from(10)])
            .unwrap();
        assert_eq!(host.active_timers(), vec![id.as_number().unwrap() as u64]);

        let set_timeout = global.get_key("setTimeout").unwrap();
        let error = set_timeout
            .as_function()
            .unwrap()
            .call(&Value::from("not a window"), &[Value::Function(tick)])
            .unwrap_err();
        assert!(error.to_string().contains("Illegal invocation"));
    }

    #[test]
    fn test_document_is_accessor_backed() {
        let document = Document::new();
        let global = SharedGlobal::browser(&HostServices::new(), &document);

        let descriptor = global
            .get_own_property_descriptor(&PropertyKey::from("document"))
            .unwrap();
        assert!(descriptor.is_accessor());
        assert!(descriptor.is_frozen());
        let value = global.get_key("document").unwrap();
        assert!(value.as_element().unwrap().ptr_eq(document.root()));
    }
}
