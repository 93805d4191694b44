//! Tenant loading.
//!
//! [`Orchestrator::load_tenant`] resolves a tenant's assets, builds its
//! sandbox, evaluates its code against the sandbox's global and returns a
//! [`ParcelFactory`] for mounting it.

pub mod exports;
pub mod render;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};
use warden_core::error::LifecycleError;
use warden_core::{Error, GlobalEnvironment, Result};
use warden_isolation::boundary::SCOPED_GLOBALS;
use warden_isolation::{HostContext, SandboxContainer, SandboxOptions};

use crate::barrier::SingularBarrier;
use crate::collaborators::{AssetLoader, ExecOptions, PrefixStyleScoper, StyleScoper, TenantApp};
use crate::config::FrameworkConfig;
use crate::hooks::{builtin_add_ons, run_chain, LifecycleHooks};
use crate::naming::{sandbox_cfg, wrap_template, InstanceNames};
use crate::parcel::{LoadedTenant, ParcelFactory};
use exports::lifecycles_from_exports;
use render::{ElementFactory, RenderPhase, Renderer, StyleIsolation, WrapperGetter};

/// Loads tenants into one host.
pub struct Orchestrator {
    ctx: Arc<HostContext>,
    config: FrameworkConfig,
    loader: Arc<dyn AssetLoader>,
    scoper: Arc<dyn StyleScoper>,
    names: InstanceNames,
    barrier: Arc<SingularBarrier>,
}

impl Orchestrator {
    /// Validate `config` and adjust it to what the host supports.
    pub fn new(
        ctx: Arc<HostContext>,
        config: FrameworkConfig,
        loader: Arc<dyn AssetLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.downgrade_for_host(ctx.capabilities());
        info!(
            "Orchestrator ready (singular: {}, sandbox: {})",
            config.singular,
            sandbox_cfg(&config.sandbox)
        );

        Ok(Self {
            ctx,
            config,
            loader,
            scoper: Arc::new(PrefixStyleScoper),
            names: InstanceNames::new(),
            barrier: Arc::new(SingularBarrier::new()),
        })
    }

    /// Replace the style scoper.
    pub fn with_style_scoper(mut self, scoper: Arc<dyn StyleScoper>) -> Self {
        self.scoper = scoper;
        self
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    /// The configuration in effect after host downgrades.
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn barrier(&self) -> &Arc<SingularBarrier> {
        &self.barrier
    }

    /// Load `app` and return the factory for its parcels. `hooks` run after
    /// the built-in add-ons.
    pub async fn load_tenant(&self, app: TenantApp, hooks: LifecycleHooks) -> Result<ParcelFactory> {
        let loaded_at = Instant::now();
        let instance = self.names.next(&app.name);
        let sandbox = &self.config.sandbox;
        let development = self.ctx.is_development() || self.config.development;
        info!("Loading tenant {} from {}", instance, app.entry);

        let payload = self
            .loader
            .import_entry(&app.entry)
            .await
            .map_err(|e| LifecycleError::AssetLoadFailed(instance.clone(), e.to_string()))?;
        payload.script.fetch_side_scripts().await?;

        if self.config.singular {
            self.barrier.wait().await;
        }

        let isolation = StyleIsolation {
            strict: sandbox.strict_style_isolation(),
            scoped_css: sandbox.scoped_css(),
            shadow_dom: self.ctx.capabilities().shadow_dom,
        };
        let elements = ElementFactory::new(
            &instance,
            &payload.template,
            payload.styles.clone(),
            sandbox_cfg(sandbox),
            isolation,
            self.scoper.clone(),
        );
        let initial_element = elements.create();

        let renderer = Renderer::new(
            &instance,
            wrap_template(&instance, &payload.template, sandbox),
            app.render.clone(),
            self.ctx.document().clone(),
            development,
        );
        renderer.render(
            Some(&initial_element),
            true,
            app.container.as_ref(),
            RenderPhase::Loading,
        )?;

        let wrapper = WrapperGetter::new(
            &instance,
            app.render.is_some(),
            isolation,
            self.ctx.document().clone(),
        );

        let sandbox_container = if sandbox.is_enabled() {
            Some(SandboxContainer::create(
                &self.ctx,
                &instance,
                SandboxOptions {
                    loose: sandbox.loose(),
                    speedy: sandbox.speedy(),
                },
            ))
        } else {
            None
        };
        let global: Arc<dyn GlobalEnvironment> = match &sandbox_container {
            Some(container) => container.global(),
            None => self.ctx.global().as_env(),
        };

        let hooks = builtin_add_ons(&global, &payload.asset_base_path)?.merge(hooks);
        run_chain(&hooks.before_load, &app, &global).await?;

        let options = ExecOptions {
            scoped_globals: if sandbox.speedy() {
                SCOPED_GLOBALS.to_vec()
            } else {
                Vec::new()
            },
        };
        let isolated = sandbox.is_enabled() && !sandbox.loose();
        let exports = payload
            .script
            .execute(global.clone(), isolated, options)
            .await
            .map_err(|e| execution_failed(&instance, e));
        self.ctx.end_turn();
        let exports = exports?;

        let latest_set_key = sandbox_container
            .as_ref()
            .and_then(|c| c.boundary().latest_set_key());
        let lifecycles = lifecycles_from_exports(
            &exports,
            &app.name,
            &global,
            latest_set_key.as_ref(),
            development,
        )?;
        debug!("Extracted lifecycles of {}", instance);

        Ok(ParcelFactory::new(LoadedTenant {
            app,
            instance,
            ctx: self.ctx.clone(),
            singular: self.config.singular,
            barrier: self.barrier.clone(),
            elements,
            renderer,
            wrapper,
            sandbox: sandbox_container,
            global,
            hooks,
            lifecycles,
            initial_element: Mutex::new(Some(initial_element)),
            loaded_at,
        }))
    }
}

fn execution_failed(instance: &str, error: Error) -> Error {
    LifecycleError::ExecutionFailed(instance.to_string(), error.to_string()).into()
}
