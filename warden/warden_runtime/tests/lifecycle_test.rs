//! End-to-end lifecycle tests: load, mount and unmount tenants through the
//! orchestrator against a browser-like host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use warden_core::error::{ConfigError, LifecycleError};
use warden_core::{
    Element, Error, Function, GlobalEnvironment, GlobalEnvironmentExt, ObjectRef, Result, Value,
};
use warden_isolation::{BoundaryKind, HostCapabilities, HostContext};
use warden_runtime::hooks::ENGINE_FLAG;
use warden_runtime::{
    hook, AssetLoader, ExecOptions, FrameworkConfig, LifecycleHooks, Orchestrator, TenantApp,
    TenantInstance, TenantPayload, TenantScript, TenantState,
};

type Events = Arc<Mutex<Vec<String>>>;
type Build = Arc<dyn Fn(Arc<dyn GlobalEnvironment>) -> Result<Value> + Send + Sync>;

struct ScriptedTenant {
    build: Build,
}

#[async_trait]
impl TenantScript for ScriptedTenant {
    async fn fetch_side_scripts(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        global: Arc<dyn GlobalEnvironment>,
        _isolated: bool,
        _options: ExecOptions,
    ) -> Result<Value> {
        (self.build)(global)
    }
}

#[derive(Default)]
struct MapLoader {
    payloads: HashMap<String, TenantPayload>,
}

impl MapLoader {
    fn with(mut self, entry: &str, build: Build) -> Self {
        self.payloads.insert(
            entry.to_string(),
            TenantPayload {
                template: format!("<main>{entry}</main>"),
                styles: vec![],
                asset_base_path: format!("https://cdn.example.com/{entry}/"),
                script: Arc::new(ScriptedTenant { build }),
            },
        );
        self
    }
}

#[async_trait]
impl AssetLoader for MapLoader {
    async fn import_entry(&self, entry: &str) -> Result<TenantPayload> {
        self.payloads
            .get(entry)
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("unknown entry {entry}")))
    }
}

fn recording(name: &str, events: &Events) -> impl Fn(&str) -> Function {
    let name = name.to_string();
    let events = events.clone();
    move |phase: &str| {
        let label = format!("{name}:{phase}");
        let events = events.clone();
        Function::new_async(phase.to_string(), move |_this, _args| {
            let label = label.clone();
            let events = events.clone();
            async move {
                events.lock().push(label);
                Ok(Value::Undefined)
            }
        })
    }
}

/// A tenant that sets `count = 5` when mounted and records every lifecycle
/// call.
fn counting_tenant(name: &str, events: &Events) -> Build {
    let name = name.to_string();
    let events = events.clone();
    Arc::new(move |global: Arc<dyn GlobalEnvironment>| {
        let record = recording(&name, &events);
        let mount = {
            let label = format!("{name}:mount");
            let events = events.clone();
            Function::new_async("mount", move |_this, args: Vec<Value>| {
                let label = label.clone();
                let events = events.clone();
                let global = global.clone();
                async move {
                    assert!(args[0].get_property("container").as_element().is_some());
                    global.set_key("count", 5)?;
                    events.lock().push(label);
                    Ok(Value::Undefined)
                }
            })
        };
        let unmount = {
            let label = format!("{name}:unmount");
            let events = events.clone();
            Function::new_async("unmount", move |_this, _args| {
                let label = label.clone();
                let events = events.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    events.lock().push(label);
                    Ok(Value::Undefined)
                }
            })
        };
        Ok(Value::Object(ObjectRef::from_entries([
            ("bootstrap", record("bootstrap")),
            ("mount", mount),
            ("unmount", unmount),
        ])))
    })
}

fn host(capabilities: HostCapabilities) -> (Arc<HostContext>, Element) {
    let ctx = HostContext::browser(capabilities);
    let root = Element::with_id("div", "root");
    ctx.document().body().append_child(root.clone());
    (ctx, root)
}

fn tenant(
    ctx: &Arc<HostContext>,
    config: FrameworkConfig,
    loader: MapLoader,
    name: &str,
) -> (Arc<Orchestrator>, TenantInstance) {
    let orchestrator = Arc::new(Orchestrator::new(ctx.clone(), config, Arc::new(loader)).unwrap());
    let app = TenantApp::new(name, name).with_container("#root");
    let instance = TenantInstance::new(orchestrator.clone(), app, LifecycleHooks::new());
    (orchestrator, instance)
}

#[tokio::test]
async fn test_mounted_global_is_removed_after_unmount() {
    let (ctx, root) = host(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    assert_eq!(alpha.state(), TenantState::Mounted);

    let factory = alpha.factory().unwrap();
    assert_eq!(factory.sandbox().unwrap().kind(), BoundaryKind::Proxy);
    assert_eq!(factory.global().get_key("count").unwrap(), Value::from(5));
    assert!(!ctx.global().has_key("count"));
    let wrapper = root.first_child().unwrap();
    assert_eq!(wrapper.attribute("data-name").as_deref(), Some("alpha"));

    alpha.unmount(ObjectRef::new()).await.unwrap();
    assert_eq!(alpha.state(), TenantState::Idle);
    assert!(!ctx.global().has_key("count"));
    assert!(root.children().is_empty());
    assert_eq!(
        *events.lock(),
        vec!["alpha:bootstrap", "alpha:mount", "alpha:unmount"]
    );
}

#[tokio::test]
async fn test_bootstrap_runs_once_across_remounts() {
    let (ctx, root) = host(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    alpha.unmount(ObjectRef::new()).await.unwrap();
    alpha.mount(None, ObjectRef::new()).await.unwrap();

    assert_eq!(
        *events.lock(),
        vec!["alpha:bootstrap", "alpha:mount", "alpha:unmount", "alpha:mount"]
    );
    assert_eq!(root.children().len(), 1);
    assert_eq!(
        alpha.factory().unwrap().global().get_key("count").unwrap(),
        Value::from(5)
    );
}

#[tokio::test]
async fn test_singular_mode_waits_for_previous_unmount() {
    let (ctx, root) = host(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default()
        .with("alpha", counting_tenant("alpha", &events))
        .with("beta", counting_tenant("beta", &events));
    let config = FrameworkConfig {
        singular: true,
        ..FrameworkConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(ctx.clone(), config, Arc::new(loader)).unwrap());
    let instance = |name: &str| {
        Arc::new(TenantInstance::new(
            orchestrator.clone(),
            TenantApp::new(name, name).with_container("#root"),
            LifecycleHooks::new(),
        ))
    };
    let alpha = instance("alpha");
    let beta = instance("beta");

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    assert!(orchestrator.barrier().is_blocking());

    let pending = {
        let beta = beta.clone();
        tokio::spawn(async move { beta.mount(None, ObjectRef::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!events.lock().contains(&"beta:mount".to_string()));
    assert_eq!(
        root.first_child().unwrap().attribute("data-name").as_deref(),
        Some("alpha")
    );

    alpha.unmount(ObjectRef::new()).await.unwrap();
    pending.await.unwrap().unwrap();

    let events = events.lock().clone();
    let position = |label: &str| events.iter().position(|e| e == label).unwrap();
    assert!(position("alpha:unmount") < position("beta:mount"));
    assert_eq!(beta.state(), TenantState::Mounted);
    assert_eq!(root.children().len(), 1);
    assert_eq!(
        root.first_child().unwrap().attribute("data-name").as_deref(),
        Some("beta")
    );
}

#[tokio::test]
async fn test_host_without_interception_uses_snapshot_boundary() {
    let (ctx, _root) = host(HostCapabilities {
        interception: false,
        ..HostCapabilities::default()
    });
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");
    assert!(orchestrator.config().sandbox.loose());

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    let factory = alpha.factory().unwrap();
    assert_eq!(factory.sandbox().unwrap().kind(), BoundaryKind::Snapshot);
    assert_eq!(ctx.global().get_key("count").unwrap(), Value::from(5));

    alpha.unmount(ObjectRef::new()).await.unwrap();
    assert!(!ctx.global().has_key("count"));
}

#[tokio::test]
async fn test_hooks_run_around_tenant_functions() {
    let (ctx, _root) = host(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let orchestrator =
        Arc::new(Orchestrator::new(ctx.clone(), FrameworkConfig::default(), Arc::new(loader)).unwrap());

    let recorder = |label: &'static str| {
        let events = events.clone();
        hook(move |_app, global: Arc<dyn GlobalEnvironment>| {
            let events = events.clone();
            async move {
                let flag = global.get_key(ENGINE_FLAG)?;
                events.lock().push(format!("{label}:{flag}"));
                Ok(())
            }
        })
    };
    let hooks = LifecycleHooks::new()
        .before_load(recorder("before_load"))
        .before_mount(recorder("before_mount"))
        .after_mount(recorder("after_mount"))
        .before_unmount(recorder("before_unmount"))
        .after_unmount(recorder("after_unmount"));
    let alpha = TenantInstance::new(
        orchestrator,
        TenantApp::new("alpha", "alpha").with_container("#root"),
        hooks,
    );

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    alpha.unmount(ObjectRef::new()).await.unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "before_load:true",
            "alpha:bootstrap",
            "before_mount:true",
            "alpha:mount",
            "after_mount:true",
            "before_unmount:undefined",
            "alpha:unmount",
            "after_unmount:undefined",
        ]
    );
}

#[tokio::test]
async fn test_lifecycles_from_latest_global_write() {
    let (ctx, _root) = host(HostCapabilities::default());
    let events = Events::default();
    let inner = counting_tenant("alpha", &events);
    let build: Build = Arc::new(move |global: Arc<dyn GlobalEnvironment>| {
        let exports = inner(global.clone())?;
        global.set_key("alpha_bundle", exports)?;
        Ok(Value::Undefined)
    });
    let loader = MapLoader::default().with("alpha", build);
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    alpha.mount(None, ObjectRef::new()).await.unwrap();
    assert_eq!(alpha.state(), TenantState::Mounted);
}

#[tokio::test]
async fn test_missing_lifecycles_is_a_load_error() {
    let (ctx, _root) = host(HostCapabilities::default());
    let build: Build = Arc::new(|_global: Arc<dyn GlobalEnvironment>| Ok(Value::Undefined));
    let loader = MapLoader::default().with("alpha", build);
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    let error = alpha.load().await.unwrap_err();
    assert!(matches!(error, Error::Config(ConfigError::MissingLifecycles(_))));
    assert_eq!(alpha.state(), TenantState::LoadError);
}

#[tokio::test]
async fn test_unknown_entry_is_an_asset_error() {
    let (ctx, _root) = host(HostCapabilities::default());
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), MapLoader::default(), "alpha");

    let error = alpha.load().await.unwrap_err();
    assert!(matches!(
        error,
        Error::Lifecycle(LifecycleError::AssetLoadFailed(..))
    ));
}

#[tokio::test]
async fn test_failed_mount_can_be_unmounted() {
    let (ctx, root) = host(HostCapabilities::default());
    let events = Events::default();
    let failing: Build = {
        let events = events.clone();
        Arc::new(move |_global: Arc<dyn GlobalEnvironment>| {
            let record = recording("alpha", &events);
            let mount = Function::new_async("mount", |_this, _args| async {
                Err(Error::Runtime("mount exploded".to_string()))
            });
            Ok(Value::Object(ObjectRef::from_entries([
                ("bootstrap", record("bootstrap")),
                ("mount", mount),
                ("unmount", record("unmount")),
            ])))
        })
    };
    let loader = MapLoader::default().with("alpha", failing);
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    let error = alpha.mount(None, ObjectRef::new()).await.unwrap_err();
    match error {
        Error::Lifecycle(LifecycleError::PhaseFailed { phase, step, .. }) => {
            assert_eq!(phase, "mount");
            assert_eq!(step, 5);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(alpha.state(), TenantState::MountFailed);
    assert_eq!(ctx.active_boundaries(), 1);

    alpha.unmount(ObjectRef::new()).await.unwrap();
    assert_eq!(alpha.state(), TenantState::Idle);
    assert!(root.children().is_empty());
    assert!(events.lock().contains(&"alpha:unmount".to_string()));
}

#[tokio::test]
async fn test_unmount_after_early_mount_failure_keeps_snapshot_host_intact() {
    let (ctx, root) = host(HostCapabilities {
        interception: false,
        ..HostCapabilities::default()
    });
    ctx.global().set_key("shared", "host").unwrap();
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    alpha.load().await.unwrap();
    assert!(ctx.document().body().remove_child(&root));

    let error = alpha.mount(None, ObjectRef::new()).await.unwrap_err();
    match error {
        Error::Lifecycle(LifecycleError::PhaseFailed { phase, step, .. }) => {
            assert_eq!(phase, "mount");
            assert_eq!(step, 2);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(alpha.state(), TenantState::MountFailed);

    alpha.unmount(ObjectRef::new()).await.unwrap();
    assert_eq!(alpha.state(), TenantState::Idle);
    assert_eq!(ctx.global().get_key("shared").unwrap(), Value::from("host"));
    assert!(ctx.global().has_key("setTimeout"));
    assert!(ctx.global().has_key("document"));
}

#[tokio::test]
async fn test_missing_container_fails_load() {
    let ctx = HostContext::browser(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    let error = alpha.load().await.unwrap_err();
    assert!(matches!(
        error,
        Error::Config(ConfigError::MissingContainer { .. })
    ));
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let (ctx, _root) = host(HostCapabilities::default());
    let events = Events::default();
    let loader = MapLoader::default().with("alpha", counting_tenant("alpha", &events));
    let (_orchestrator, alpha) = tenant(&ctx, FrameworkConfig::default(), loader, "alpha");

    assert!(alpha.unmount(ObjectRef::new()).await.is_err());
    alpha.mount(None, ObjectRef::new()).await.unwrap();
    assert!(alpha.mount(None, ObjectRef::new()).await.is_err());
    assert!(alpha.dispose().is_err());

    alpha.unmount(ObjectRef::new()).await.unwrap();
    alpha.dispose().unwrap();
    assert_eq!(alpha.state(), TenantState::Disposed);
    assert!(alpha.factory().is_none());
}
