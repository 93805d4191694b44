//! Extraction of a tenant's lifecycle functions from its evaluated code.

use std::sync::Arc;

use tracing::warn;
use warden_core::error::ConfigError;
use warden_core::{Function, GlobalEnvironment, PropertyKey, Result, Value};

/// The functions a tenant exports.
#[derive(Clone, Debug)]
pub struct Lifecycles {
    pub bootstrap: Function,
    pub mount: Function,
    pub unmount: Function,
    pub update: Option<Function>,
}

impl Lifecycles {
    /// Read the lifecycle functions off an export object. `None` unless all
    /// three of `bootstrap`, `mount` and `unmount` are callable.
    pub fn from_value(exports: &Value) -> Option<Self> {
        let function = |key: &str| exports.get_property(key).as_function().cloned();
        Some(Self {
            bootstrap: function("bootstrap")?,
            mount: function("mount")?,
            unmount: function("unmount")?,
            update: function("update"),
        })
    }
}

/// Find the tenant's lifecycles. Tried in order: the returned exports, the
/// last property the tenant wrote to its global, and the global property
/// named after the tenant.
pub fn lifecycles_from_exports(
    exports: &Value,
    app_name: &str,
    global: &Arc<dyn GlobalEnvironment>,
    latest_set_key: Option<&PropertyKey>,
    development: bool,
) -> Result<Lifecycles> {
    if let Some(lifecycles) = Lifecycles::from_value(exports) {
        return Ok(lifecycles);
    }

    if let Some(key) = latest_set_key {
        if let Some(lifecycles) = Lifecycles::from_value(&global.get(key)?) {
            return Ok(lifecycles);
        }
    }

    if development {
        warn!(
            "Lifecycle not found from {} entry exports, fallback to get from window['{}']",
            app_name, app_name
        );
    }

    let named = global.get(&PropertyKey::from(app_name))?;
    Lifecycles::from_value(&named)
        .ok_or_else(|| ConfigError::MissingLifecycles(app_name.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{GlobalEnvironmentExt, ObjectRef, SharedGlobal};

    fn lifecycle_object() -> Value {
        let noop = |name: &str| Function::new(name, |_this, _args| Ok(Value::Undefined));
        Value::Object(ObjectRef::from_entries([
            ("bootstrap", noop("bootstrap")),
            ("mount", noop("mount")),
            ("unmount", noop("unmount")),
        ]))
    }

    #[test]
    fn test_direct_exports_win() {
        let global = SharedGlobal::new().as_env();
        let lifecycles =
            lifecycles_from_exports(&lifecycle_object(), "alpha", &global, None, false).unwrap();
        assert_eq!(lifecycles.mount.name(), "mount");
        assert!(lifecycles.update.is_none());
    }

    #[test]
    fn test_falls_back_to_latest_set_key_then_name() {
        let global = SharedGlobal::new().as_env();
        global.set_key("webpackJsonp_alpha", lifecycle_object()).unwrap();
        let key = PropertyKey::from("webpackJsonp_alpha");
        assert!(lifecycles_from_exports(&Value::Undefined, "alpha", &global, Some(&key), false).is_ok());

        let global = SharedGlobal::new().as_env();
        global.set_key("alpha", lifecycle_object()).unwrap();
        assert!(lifecycles_from_exports(&Value::Undefined, "alpha", &global, None, true).is_ok());
    }

    #[test]
    fn test_incomplete_exports_are_rejected() {
        let global = SharedGlobal::new().as_env();
        let partial = Value::Object(ObjectRef::from_entries([(
            "mount",
            Function::new("mount", |_this, _args| Ok(Value::Undefined)),
        )]));

        let error = lifecycles_from_exports(&partial, "alpha", &global, None, false).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Configuration error: You need to export lifecycle functions in alpha entry"
        );
    }
}
