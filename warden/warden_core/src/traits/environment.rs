//! The global environment capability table.
//!
//! Tenant code never touches the shared global directly. It is handed an
//! `Arc<dyn GlobalEnvironment>` and every read, write, deletion and
//! introspection goes through the named operations below. The real shared
//! global implements the trait with plain property storage; isolation
//! boundaries implement it with their own delegation rules.
//!
//! # Examples
//!
//! ```
//! use warden_core::global::SharedGlobal;
//! use warden_core::traits::GlobalEnvironmentExt;
//! use warden_core::value::Value;
//!
//! let global = SharedGlobal::new();
//! global.set_key("count", 5).unwrap();
//! assert_eq!(global.get_key("count").unwrap(), Value::from(5));
//! assert!(global.has_key("window"));
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{IsolationError, Result};
use crate::value::{PropertyDescriptor, PropertyKey, Value};

/// Operations every global environment exposes.
///
/// Implementations must never hold an internal lock while calling into a
/// getter, setter or other tenant-supplied function.
pub trait GlobalEnvironment: Send + Sync {
    /// Human-readable name used in diagnostics.
    fn label(&self) -> &str;

    /// Read a property. Missing properties read as `Undefined`.
    fn get(&self, key: &PropertyKey) -> Result<Value>;

    /// Assign a property. Returns `false` when the assignment was refused
    /// without raising (e.g. a non-writable slot).
    fn set(&self, key: &PropertyKey, value: Value) -> Result<bool>;

    /// Whether the key resolves on this environment.
    fn has(&self, key: &PropertyKey) -> bool;

    /// Delete a property. Returns `false` when the property refused deletion.
    fn delete(&self, key: &PropertyKey) -> Result<bool>;

    /// Own keys in enumeration order.
    fn own_keys(&self) -> Vec<PropertyKey>;

    /// The descriptor of an own property.
    fn get_own_property_descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor>;

    /// Define or redefine a property.
    fn define_property(&self, key: &PropertyKey, descriptor: PropertyDescriptor) -> Result<bool>;

    /// The prototype the environment reports for `instanceof` style checks.
    fn get_prototype_of(&self) -> Option<Prototype>;

    /// A weak, identity-comparable handle to this environment.
    fn as_global_ref(&self) -> GlobalRef;

    /// Whether the key is an own property.
    fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.get_own_property_descriptor(key).is_some()
    }
}

/// Convenience methods taking string keys.
pub trait GlobalEnvironmentExt: GlobalEnvironment {
    fn get_key(&self, key: &str) -> Result<Value> {
        self.get(&PropertyKey::from(key))
    }

    fn set_key(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        self.set(&PropertyKey::from(key), value.into())
    }

    fn has_key(&self, key: &str) -> bool {
        self.has(&PropertyKey::from(key))
    }

    fn delete_key(&self, key: &str) -> Result<bool> {
        self.delete(&PropertyKey::from(key))
    }

    /// Read `key` and call it with this environment as receiver, the way
    /// `window.key(args)` would.
    fn call_method(&self, key: &str, args: &[Value]) -> Result<Value> {
        let callee = self.get_key(key)?;
        let function = callee.expect_function(key)?;
        function.call(&Value::Global(self.as_global_ref()), args)
    }

    /// Own keys whose descriptors are enumerable.
    fn enumerable_keys(&self) -> Vec<PropertyKey> {
        self.own_keys()
            .into_iter()
            .filter(|key| {
                self.get_own_property_descriptor(key)
                    .map(|d| d.is_enumerable())
                    .unwrap_or(false)
            })
            .collect()
    }
}

impl<T: GlobalEnvironment + ?Sized> GlobalEnvironmentExt for T {}

/// A weak handle to a global environment.
///
/// Globals refer to themselves (`window.window`), so values only ever hold
/// weak handles. Two handles are equal when they point at the same
/// environment.
#[derive(Clone)]
pub struct GlobalRef {
    inner: Weak<dyn GlobalEnvironment>,
    label: Arc<str>,
}

impl GlobalRef {
    pub fn new(inner: Weak<dyn GlobalEnvironment>, label: &str) -> Self {
        Self {
            inner,
            label: Arc::from(label),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn upgrade(&self) -> Option<Arc<dyn GlobalEnvironment>> {
        self.inner.upgrade()
    }

    /// Upgrade or fail because the owning boundary has been dropped.
    pub fn resolve(&self) -> Result<Arc<dyn GlobalEnvironment>> {
        self.upgrade()
            .ok_or_else(|| IsolationError::GlobalDropped(self.label.to_string()).into())
    }

    pub fn ptr_eq(&self, other: &GlobalRef) -> bool {
        std::ptr::addr_eq(self.inner.as_ptr(), other.inner.as_ptr())
    }

    /// Whether this handle refers to `env`.
    pub fn refers_to(&self, env: &Arc<dyn GlobalEnvironment>) -> bool {
        std::ptr::addr_eq(self.inner.as_ptr(), Arc::as_ptr(env))
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalRef({})", self.label)
    }
}

/// Identity of a prototype object.
#[derive(Clone)]
pub struct Prototype(Arc<str>);

impl Prototype {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Prototype {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Prototype {}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prototype({})", self.0)
    }
}
