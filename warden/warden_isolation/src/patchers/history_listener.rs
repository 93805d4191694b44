//! Router `listen` tracking.
//!
//! Hosts that expose a router history object as `g_history` let tenants
//! subscribe to navigation through `g_history.listen`. Those subscriptions
//! are dropped on unmount and re-established on the next mount.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use warden_core::error::EnvironmentError;
use warden_core::{Function, GlobalEnvironment, GlobalEnvironmentExt, ObjectRef, Result, Value};

use super::{noop_rebuilder, Freer, Rebuilder};

/// Global key of the router history object.
pub const HISTORY_KEY: &str = "g_history";

#[derive(Default)]
struct Subscriptions {
    listeners: Vec<Function>,
    unlisteners: Vec<Function>,
}

struct HistoryListenerPatch {
    tenant: String,
    history: ObjectRef,
    raw_listen: Function,
    subscriptions: Arc<Mutex<Subscriptions>>,
    freed: AtomicBool,
}

/// Nothing to patch: the host has no router history.
struct Unpatched;

impl Freer for Unpatched {
    fn name(&self) -> &'static str {
        "history-listener"
    }

    fn free(&self) -> Result<Rebuilder> {
        Ok(noop_rebuilder())
    }
}

pub fn patch_history_listener(
    tenant: &str,
    global: &Arc<dyn GlobalEnvironment>,
) -> Result<Box<dyn Freer>> {
    let history = match global.get_key(HISTORY_KEY)? {
        Value::Object(history) => history,
        _ => return Ok(Box::new(Unpatched)),
    };
    let raw_listen = match history.get("listen") {
        Value::Function(listen) => listen,
        _ => return Ok(Box::new(Unpatched)),
    };
    let subscriptions = Arc::new(Mutex::new(Subscriptions::default()));

    let listen = {
        let history = history.clone();
        let raw_listen = raw_listen.clone();
        let subscriptions = subscriptions.clone();
        Function::new("listen", move |_this, args| {
            let listener = args
                .first()
                .ok_or_else(|| EnvironmentError::NotCallable("history listener".to_string()))?
                .expect_function("history listener")?
                .clone();
            let unlisten = raw_listen.call(&Value::Object(history.clone()), args)?;
            let unlisten = unlisten.expect_function("unlisten")?.clone();

            {
                let mut subs = subscriptions.lock();
                subs.listeners.push(listener.clone());
                subs.unlisteners.push(unlisten.clone());
            }

            let subscriptions = subscriptions.clone();
            Ok(Value::Function(Function::new("unlisten", move |_this, _args| {
                unlisten.call(&Value::Undefined, &[])?;
                let mut subs = subscriptions.lock();
                subs.listeners.retain(|l| !l.ptr_eq(&listener));
                subs.unlisteners.retain(|u| !u.ptr_eq(&unlisten));
                Ok(Value::Undefined)
            })))
        })
    };
    history.set("listen", listen);

    Ok(Box::new(HistoryListenerPatch {
        tenant: tenant.to_string(),
        history,
        raw_listen,
        subscriptions,
        freed: AtomicBool::new(false),
    }))
}

impl Freer for HistoryListenerPatch {
    fn name(&self) -> &'static str {
        "history-listener"
    }

    fn free(&self) -> Result<Rebuilder> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(noop_rebuilder());
        }

        let Subscriptions {
            listeners,
            unlisteners,
        } = std::mem::take(&mut *self.subscriptions.lock());

        for unlisten in unlisteners {
            unlisten.call(&Value::Undefined, &[])?;
        }
        self.history.set("listen", self.raw_listen.clone());

        if listeners.is_empty() {
            return Ok(noop_rebuilder());
        }

        debug!(
            "Unsubscribed {} history listeners of {}; they resubscribe on remount",
            listeners.len(),
            self.tenant
        );
        let history = self.history.clone();
        Ok(Box::new(move || {
            let listen = history.get("listen");
            let listen = listen.expect_function("listen")?;
            for listener in listeners {
                listen.call(&Value::Object(history.clone()), &[Value::Function(listener)])?;
            }
            Ok(())
        }))
    }
}
