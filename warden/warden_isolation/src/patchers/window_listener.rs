//! Window event listener tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;
use warden_core::{Function, GlobalEnvironment, GlobalEnvironmentExt, Result, Value};

use super::{noop_rebuilder, Freer, Rebuilder};

type Listeners = Arc<Mutex<IndexMap<String, Vec<Function>>>>;

struct WindowListenerPatch {
    tenant: String,
    global: Arc<dyn GlobalEnvironment>,
    raw_add: Function,
    raw_remove: Function,
    listeners: Listeners,
    freed: AtomicBool,
}

fn listener_args(args: &[Value]) -> Option<(String, Function)> {
    let event = args.first()?.as_str()?.to_string();
    let listener = args.get(1)?.as_function()?.clone();
    Some((event, listener))
}

/// Wrap `addEventListener`/`removeEventListener` so listeners the tenant
/// leaves attached to the window are removed on free.
pub fn patch_window_listener(
    tenant: &str,
    global: &Arc<dyn GlobalEnvironment>,
) -> Result<Box<dyn Freer>> {
    let raw_add = global
        .get_key("addEventListener")?
        .expect_function("addEventListener")?
        .clone();
    let raw_remove = global
        .get_key("removeEventListener")?
        .expect_function("removeEventListener")?
        .clone();
    let listeners: Listeners = Arc::new(Mutex::new(IndexMap::new()));

    let add = {
        let raw_add = raw_add.clone();
        let listeners = listeners.clone();
        Function::new("addEventListener", move |_this, args| {
            if let Some((event, listener)) = listener_args(args) {
                let mut listeners = listeners.lock();
                let entry = listeners.entry(event).or_default();
                if !entry.iter().any(|l| l.ptr_eq(&listener)) {
                    entry.push(listener);
                }
            }
            raw_add.call(&Value::Undefined, args)
        })
    };

    let remove = {
        let raw_remove = raw_remove.clone();
        let listeners = listeners.clone();
        Function::new("removeEventListener", move |_this, args| {
            if let Some((event, listener)) = listener_args(args) {
                if let Some(entry) = listeners.lock().get_mut(&event) {
                    entry.retain(|l| !l.ptr_eq(&listener));
                }
            }
            raw_remove.call(&Value::Undefined, args)
        })
    };

    global.set_key("addEventListener", add)?;
    global.set_key("removeEventListener", remove)?;

    Ok(Box::new(WindowListenerPatch {
        tenant: tenant.to_string(),
        global: global.clone(),
        raw_add,
        raw_remove,
        listeners,
        freed: AtomicBool::new(false),
    }))
}

impl Freer for WindowListenerPatch {
    fn name(&self) -> &'static str {
        "window-listener"
    }

    fn free(&self) -> Result<Rebuilder> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(noop_rebuilder());
        }

        let leftover: Vec<(String, Vec<Function>)> = self.listeners.lock().drain(..).collect();
        for (event, listeners) in leftover {
            if !listeners.is_empty() {
                debug!("Removing {} {} listeners left by {}", listeners.len(), event, self.tenant);
            }
            for listener in listeners {
                self.raw_remove
                    .call(&Value::Undefined, &[Value::from(event.as_str()), Value::Function(listener)])?;
            }
        }

        self.global
            .set_key("addEventListener", Value::Function(self.raw_add.clone()))?;
        self.global
            .set_key("removeEventListener", Value::Function(self.raw_remove.clone()))?;
        Ok(noop_rebuilder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{IsolationBoundary, ProxyBoundary, ProxyOptions};
    use crate::context::{HostCapabilities, HostContext};

    #[test]
    fn test_free_removes_tenant_listeners_only() {
        let ctx = HostContext::browser(HostCapabilities::default());
        let boundary = ProxyBoundary::new(&ctx, "alpha", ProxyOptions::default());
        let global = boundary.global();
        let host_listener = Function::new("host", |_this, _args| Ok(Value::Undefined));
        let tenant_listener = Function::new("tenant", |_this, _args| Ok(Value::Undefined));

        ctx.host().add_event_listener("popstate", host_listener);
        let freer = patch_window_listener("alpha", &global).unwrap();
        global
            .call_method(
                "addEventListener",
                &[Value::from("popstate"), Value::Function(tenant_listener)],
            )
            .unwrap();
        assert_eq!(ctx.host().listener_count("popstate"), 2);

        freer.free().unwrap();
        assert_eq!(ctx.host().listener_count("popstate"), 1);
    }
}
