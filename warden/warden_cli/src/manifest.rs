//! Simulation manifests and the scripted asset loader built from them.
//!
//! A manifest declares tenants by what they do to the global while their
//! code evaluates, when they bootstrap and when they mount. The scripted
//! loader turns each declaration into a payload whose lifecycle functions
//! perform exactly those actions.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use warden_core::{Error, Function, GlobalEnvironment, GlobalEnvironmentExt, ObjectRef, Result, Value};
use warden_isolation::HostCapabilities;
use warden_runtime::{AssetLoader, ExecOptions, TenantPayload, TenantScript};

/// A simulation manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub host: HostSection,

    #[serde(default, rename = "tenant")]
    pub tenants: Vec<TenantSpec>,
}

/// What the simulated host supports.
#[derive(Debug, Clone, Deserialize)]
pub struct HostSection {
    #[serde(default = "default_true")]
    pub interception: bool,

    #[serde(default = "default_true")]
    pub destructuring: bool,

    #[serde(default = "default_true")]
    pub shadow_dom: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            interception: true,
            destructuring: true,
            shadow_dom: true,
        }
    }
}

impl From<&HostSection> for HostCapabilities {
    fn from(host: &HostSection) -> Self {
        HostCapabilities {
            interception: host.interception,
            destructuring: host.destructuring,
            shadow_dom: host.shadow_dom,
        }
    }
}

/// One tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantSpec {
    pub name: String,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default)]
    pub template: String,

    #[serde(default)]
    pub styles: Vec<String>,

    /// Run while the tenant's code is evaluated
    #[serde(default)]
    pub on_evaluate: Actions,

    #[serde(default)]
    pub on_bootstrap: Actions,

    #[serde(default)]
    pub on_mount: Actions,
}

/// Side effects a lifecycle function performs on its global.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Actions {
    /// Properties to assign
    #[serde(default)]
    pub globals: BTreeMap<String, toml::Value>,

    /// Delays of intervals to start
    #[serde(default)]
    pub intervals: Vec<u64>,

    /// Window events to listen to
    #[serde(default)]
    pub listeners: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_container() -> String {
    "#root".to_string()
}

impl Manifest {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            bail!("Manifest not found: {}", path);
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let manifest: Manifest = toml::from_str(content).context("parsing manifest")?;
        if manifest.tenants.is_empty() {
            bail!("Manifest declares no tenants");
        }
        Ok(manifest)
    }
}

fn to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::from(s.as_str()),
        toml::Value::Integer(i) => Value::Number(*i as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        other => Value::from(other.to_string()),
    }
}

impl Actions {
    fn apply(&self, tenant: &str, global: &Arc<dyn GlobalEnvironment>) -> Result<()> {
        for (key, value) in &self.globals {
            global.set_key(key, to_value(value))?;
        }
        for delay in &self.intervals {
            let tick = Function::new(format!("{tenant} tick"), |_this, _args| Ok(Value::Undefined));
            global.call_method("setInterval", &[Value::Function(tick), Value::from(*delay)])?;
        }
        for event in &self.listeners {
            let listener = Function::new(format!("{tenant} on {event}"), |_this, _args| {
                Ok(Value::Undefined)
            });
            global.call_method(
                "addEventListener",
                &[Value::from(event.as_str()), Value::Function(listener)],
            )?;
        }
        Ok(())
    }
}

fn lifecycle(name: &str, tenant: &str, actions: Actions, global: Arc<dyn GlobalEnvironment>) -> Function {
    let tenant = tenant.to_string();
    Function::new(name, move |_this, _args| {
        actions.apply(&tenant, &global)?;
        Ok(Value::Undefined)
    })
}

struct ScriptedTenant {
    spec: TenantSpec,
}

#[async_trait]
impl TenantScript for ScriptedTenant {
    async fn fetch_side_scripts(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        global: Arc<dyn GlobalEnvironment>,
        isolated: bool,
        _options: ExecOptions,
    ) -> Result<Value> {
        let spec = &self.spec;
        debug!("Evaluating {} (isolated: {})", spec.name, isolated);
        spec.on_evaluate.apply(&spec.name, &global)?;

        Ok(Value::Object(ObjectRef::from_entries([
            (
                "bootstrap",
                lifecycle("bootstrap", &spec.name, spec.on_bootstrap.clone(), global.clone()),
            ),
            (
                "mount",
                lifecycle("mount", &spec.name, spec.on_mount.clone(), global.clone()),
            ),
            ("unmount", lifecycle("unmount", &spec.name, Actions::default(), global)),
        ])))
    }
}

/// Resolves tenant names to scripted payloads.
pub struct ScriptedLoader {
    tenants: HashMap<String, TenantSpec>,
}

impl ScriptedLoader {
    pub fn new(manifest: &Manifest) -> Self {
        let tenants = manifest
            .tenants
            .iter()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();
        Self { tenants }
    }
}

#[async_trait]
impl AssetLoader for ScriptedLoader {
    async fn import_entry(&self, entry: &str) -> Result<TenantPayload> {
        let spec = self
            .tenants
            .get(entry)
            .ok_or_else(|| Error::Runtime(format!("no tenant named {entry} in manifest")))?;

        Ok(TenantPayload {
            template: spec.template.clone(),
            styles: spec.styles.clone(),
            asset_base_path: format!("/{}/", spec.name),
            script: Arc::new(ScriptedTenant { spec: spec.clone() }),
        })
    }
}
