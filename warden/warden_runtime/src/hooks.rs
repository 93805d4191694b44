//! Lifecycle hooks and the built-in add-ons.
//!
//! Hooks run in registration order around the tenant's own lifecycle
//! functions. Each receives the tenant and the global its code runs
//! against. The built-in add-ons are merged in front of caller hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use warden_core::{GlobalEnvironment, GlobalEnvironmentExt, Result, Value};

use crate::collaborators::TenantApp;

/// Set to `true` on the tenant's global while it is loaded or mounted.
pub const ENGINE_FLAG: &str = "__POWERED_BY_WARDEN__";

/// The public path the tenant should load its assets from.
pub const PUBLIC_PATH_KEY: &str = "__INJECTED_PUBLIC_PATH_BY_WARDEN__";

/// A single hook.
pub type Hook =
    Arc<dyn Fn(TenantApp, Arc<dyn GlobalEnvironment>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(TenantApp, Arc<dyn GlobalEnvironment>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |app, global| f(app, global).boxed())
}

/// Hooks grouped by the point they run at.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub before_load: Vec<Hook>,
    pub before_mount: Vec<Hook>,
    pub after_mount: Vec<Hook>,
    pub before_unmount: Vec<Hook>,
    pub after_unmount: Vec<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_load(mut self, hook: Hook) -> Self {
        self.before_load.push(hook);
        self
    }

    pub fn before_mount(mut self, hook: Hook) -> Self {
        self.before_mount.push(hook);
        self
    }

    pub fn after_mount(mut self, hook: Hook) -> Self {
        self.after_mount.push(hook);
        self
    }

    pub fn before_unmount(mut self, hook: Hook) -> Self {
        self.before_unmount.push(hook);
        self
    }

    pub fn after_unmount(mut self, hook: Hook) -> Self {
        self.after_unmount.push(hook);
        self
    }

    /// `self`'s hooks followed by `other`'s, per point.
    pub fn merge(mut self, other: LifecycleHooks) -> Self {
        self.before_load.extend(other.before_load);
        self.before_mount.extend(other.before_mount);
        self.after_mount.extend(other.after_mount);
        self.before_unmount.extend(other.before_unmount);
        self.after_unmount.extend(other.after_unmount);
        self
    }
}

/// Run hooks strictly one after another.
pub async fn run_chain(
    hooks: &[Hook],
    app: &TenantApp,
    global: &Arc<dyn GlobalEnvironment>,
) -> Result<()> {
    for hook in hooks {
        hook(app.clone(), global.clone()).await?;
    }
    Ok(())
}

/// The engine flag add-on.
pub fn engine_flag_add_on() -> LifecycleHooks {
    let set_flag = hook(|_app, global: Arc<dyn GlobalEnvironment>| async move {
        global.set_key(ENGINE_FLAG, true)?;
        Ok(())
    });

    LifecycleHooks::new()
        .before_load(set_flag.clone())
        .before_mount(set_flag)
        .before_unmount(hook(|_app, global: Arc<dyn GlobalEnvironment>| async move {
            global.delete_key(ENGINE_FLAG)?;
            Ok(())
        }))
}

/// The runtime public path add-on. The value `global` holds when the add-on
/// is created is put back before every unmount.
pub fn public_path_add_on(global: &Arc<dyn GlobalEnvironment>, public_path: &str) -> Result<LifecycleHooks> {
    let raw = global.get_key(PUBLIC_PATH_KEY)?;
    let public_path = if public_path.is_empty() { "/" } else { public_path }.to_string();
    let mounted_once = Arc::new(AtomicBool::new(false));

    let before_load = {
        let public_path = public_path.clone();
        hook(move |_app, global: Arc<dyn GlobalEnvironment>| {
            let public_path = public_path.clone();
            async move {
                global.set_key(PUBLIC_PATH_KEY, public_path)?;
                Ok(())
            }
        })
    };

    let before_mount = {
        let mounted_once = mounted_once.clone();
        hook(move |_app, global: Arc<dyn GlobalEnvironment>| {
            let public_path = public_path.clone();
            let mounted_once = mounted_once.load(Ordering::Acquire);
            async move {
                if mounted_once {
                    global.set_key(PUBLIC_PATH_KEY, public_path)?;
                }
                Ok(())
            }
        })
    };

    let before_unmount = hook(move |_app, global: Arc<dyn GlobalEnvironment>| {
        let raw = raw.clone();
        let mounted_once = mounted_once.clone();
        async move {
            match raw {
                Value::Undefined => {
                    global.delete_key(PUBLIC_PATH_KEY)?;
                }
                value => {
                    global.set_key(PUBLIC_PATH_KEY, value)?;
                }
            }
            mounted_once.store(true, Ordering::Release);
            Ok(())
        }
    });

    Ok(LifecycleHooks::new()
        .before_load(before_load)
        .before_mount(before_mount)
        .before_unmount(before_unmount))
}

/// Every built-in add-on for a tenant.
pub fn builtin_add_ons(
    global: &Arc<dyn GlobalEnvironment>,
    public_path: &str,
) -> Result<LifecycleHooks> {
    Ok(engine_flag_add_on().merge(public_path_add_on(global, public_path)?))
}
