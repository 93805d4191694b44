//! Receiver rebinding for callables read through a boundary.
//!
//! Reading `setTimeout` through a tenant's global would otherwise call the
//! native with the tenant's global as receiver, which the native rejects.
//! Bound wrappers are cached per original function so repeated reads yield
//! the same identity (libraries compare listener functions by identity).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;
use warden_core::{Function, GlobalRef, Value};

/// Per-boundary cache of bound wrappers, keyed by the original function.
#[derive(Default)]
pub struct RebindCache {
    entries: Mutex<HashMap<usize, Function>>,
}

impl RebindCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to `target` if it is a plain callable. Bound functions,
    /// constructors and non-callables pass through untouched.
    pub fn rebind(&self, target: &GlobalRef, value: Value) -> Value {
        let original = match &value {
            Value::Function(f) if !f.is_bound() && !f.is_constructor() => f,
            _ => return value,
        };

        let mut entries = self.entries.lock();
        if let Some(bound) = entries.get(&original.identity()) {
            if bound.target().map(|t| t.ptr_eq(original)).unwrap_or(false) {
                return Value::Function(bound.clone());
            }
        }

        trace!("Binding {} to {}", original.name(), target.label());
        let bound = original.bind(Value::Global(target.clone()));
        entries.insert(original.identity(), bound.clone());
        Value::Function(bound)
    }
}
