//! Tenant simulation
//!
//! Mounts and unmounts every tenant of a manifest on one in-memory host and
//! compares the shared global, timers and listeners against the state
//! before any tenant ran.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use serde::Serialize;
use tracing::info;
use warden_core::{Element, ObjectRef, PropertyKey, Value};
use warden_isolation::HostContext;
use warden_runtime::hooks::{ENGINE_FLAG, PUBLIC_PATH_KEY};
use warden_runtime::{FrameworkConfig, LifecycleHooks, Orchestrator, TenantApp, TenantInstance};

use crate::manifest::{Manifest, ScriptedLoader};

/// Arguments for the simulate command
#[derive(Args)]
pub struct SimulateArgs {
    /// Path to the tenant manifest
    #[clap(long)]
    pub manifest: String,

    /// Path to the framework configuration file
    #[clap(long)]
    pub config: Option<String>,
}

/// What a phase left behind relative to the baseline.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Residue {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub timers: usize,
    pub listeners: BTreeMap<String, usize>,
}

impl Residue {
    pub fn is_clean(&self) -> bool {
        *self == Residue::default()
    }
}

#[derive(Debug, Serialize)]
struct TenantReport {
    name: String,
    sandbox: Option<String>,
    mounted: Residue,
    unmounted: Residue,
    leaked: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    tenants: Vec<TenantReport>,
    leaked: Vec<String>,
}

/// Host state before any tenant ran.
struct Baseline {
    globals: Vec<(PropertyKey, Value)>,
    timers: HashSet<u64>,
    listeners: BTreeMap<String, usize>,
}

/// Keys the built-in add-ons leave on the host.
fn is_marker(key: &PropertyKey) -> bool {
    key.as_str() == ENGINE_FLAG || key.as_str() == PUBLIC_PATH_KEY
}

fn listeners(ctx: &HostContext) -> BTreeMap<String, usize> {
    ctx.host().listener_counts().into_iter().collect()
}

impl Baseline {
    fn capture(ctx: &HostContext) -> warden_core::Result<Self> {
        Ok(Self {
            globals: ctx.global().enumerable_snapshot()?.into_iter().collect(),
            timers: ctx.host().active_timers().into_iter().collect(),
            listeners: listeners(ctx),
        })
    }

    fn residue(&self, ctx: &HostContext) -> warden_core::Result<Residue> {
        let current = ctx.global().enumerable_snapshot()?;
        let mut residue = Residue::default();

        for (key, value) in &current {
            if is_marker(key) {
                continue;
            }
            match self.globals.iter().find(|(k, _)| k == key) {
                None => residue.added.push(key.to_string()),
                Some((_, before)) if !before.same_value(value) => {
                    residue.changed.push(key.to_string())
                }
                Some(_) => {}
            }
        }
        for (key, _) in &self.globals {
            if !is_marker(key) && !current.contains_key(key) {
                residue.removed.push(key.to_string());
            }
        }

        residue.timers = ctx
            .host()
            .active_timers()
            .iter()
            .filter(|id| !self.timers.contains(*id))
            .count();

        for (event, count) in listeners(ctx) {
            let before = self.listeners.get(&event).copied().unwrap_or(0);
            if count > before {
                residue.listeners.insert(event, count - before);
            }
        }

        Ok(residue)
    }
}

/// Containers named by id must exist before tenants render into them.
fn ensure_containers(ctx: &HostContext, manifest: &Manifest) {
    let document = ctx.document();
    for tenant in &manifest.tenants {
        if let Some(id) = tenant.container.strip_prefix('#') {
            if document.get_element_by_id(id).is_none() {
                document.body().append_child(Element::with_id("div", id));
            }
        }
    }
}

/// Implementation of the simulate command
pub async fn execute_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let manifest = Manifest::load(&args.manifest).await?;
    let config = FrameworkConfig::load(args.config.as_deref()).await?;

    let mut ctx = HostContext::browser((&manifest.host).into());
    if config.development {
        ctx = ctx.in_development();
    }
    ensure_containers(&ctx, &manifest);

    let loader = Arc::new(ScriptedLoader::new(&manifest));
    let orchestrator = Arc::new(Orchestrator::new(ctx.clone(), config, loader)?);
    let baseline = Baseline::capture(&ctx)?;

    let mut reports = Vec::new();
    for tenant in &manifest.tenants {
        info!("Simulating tenant {}", tenant.name);
        let app = TenantApp::new(&tenant.name, &tenant.name).with_container(tenant.container.as_str());
        let instance = TenantInstance::new(orchestrator.clone(), app, LifecycleHooks::new());

        instance.mount(None, ObjectRef::new()).await?;
        let mounted = baseline.residue(&ctx)?;
        let sandbox = instance
            .factory()
            .and_then(|f| f.sandbox().map(|s| s.kind().to_string()));

        instance.unmount(ObjectRef::new()).await?;
        let unmounted = baseline.residue(&ctx)?;
        instance.dispose()?;

        reports.push(TenantReport {
            name: tenant.name.clone(),
            sandbox,
            leaked: !unmounted.is_clean(),
            mounted,
            unmounted,
        });
    }

    let leaked: Vec<String> = reports
        .iter()
        .filter(|r| r.leaked)
        .map(|r| r.name.clone())
        .collect();
    let report = SimulationReport {
        tenants: reports,
        leaked: leaked.clone(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !leaked.is_empty() {
        bail!("Tenants leaked state onto the host: {}", leaked.join(", "));
    }
    Ok(())
}
