//! Mount and unmount step sequences for a loaded tenant.
//!
//! A [`ParcelFactory`] is what loading a tenant produces. Each call to
//! [`ParcelFactory::create`] yields a [`ParcelConfig`] for one activation:
//! the tenant's `bootstrap`, its ordered mount and unmount steps, and its
//! optional `update`. Steps run strictly one after another; a failing step
//! aborts the rest of its phase.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};
use warden_core::error::LifecycleError;
use warden_core::{Element, Error, GlobalEnvironment, ObjectRef, Result, Value};
use warden_isolation::{HostContext, SandboxContainer};

use crate::barrier::{Deferred, SingularBarrier};
use crate::collaborators::{Container, TenantApp};
use crate::hooks::{run_chain, LifecycleHooks};
use crate::loader::exports::Lifecycles;
use crate::loader::render::{ElementFactory, RenderPhase, Renderer, WrapperGetter};

/// Steps of the mount phase, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStep {
    /// Wait until the previously mounted tenant is fully unmounted.
    AwaitSingular,
    PrepareWrapper,
    /// Create a wrapper if needed and put it into the container.
    RenderMounting,
    MountSandbox,
    BeforeMountHooks,
    MountTenant,
    RenderMounted,
    AfterMountHooks,
    /// Arm the barrier the next tenant will wait on.
    ArmBarrier,
}

pub const MOUNT_STEPS: [MountStep; 9] = [
    MountStep::AwaitSingular,
    MountStep::PrepareWrapper,
    MountStep::RenderMounting,
    MountStep::MountSandbox,
    MountStep::BeforeMountHooks,
    MountStep::MountTenant,
    MountStep::RenderMounted,
    MountStep::AfterMountHooks,
    MountStep::ArmBarrier,
];

/// Steps of the unmount phase, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountStep {
    BeforeUnmountHooks,
    UnmountTenant,
    UnmountSandbox,
    AfterUnmountHooks,
    ClearContainer,
    /// Resolve the barrier armed during mount.
    ReleaseBarrier,
}

pub const UNMOUNT_STEPS: [UnmountStep; 6] = [
    UnmountStep::BeforeUnmountHooks,
    UnmountStep::UnmountTenant,
    UnmountStep::UnmountSandbox,
    UnmountStep::AfterUnmountHooks,
    UnmountStep::ClearContainer,
    UnmountStep::ReleaseBarrier,
];

/// Everything loading a tenant produced. Shared by every parcel created
/// from the same load.
pub(crate) struct LoadedTenant {
    pub(crate) app: TenantApp,
    pub(crate) instance: String,
    pub(crate) ctx: Arc<HostContext>,
    pub(crate) singular: bool,
    pub(crate) barrier: Arc<SingularBarrier>,
    pub(crate) elements: ElementFactory,
    pub(crate) renderer: Renderer,
    pub(crate) wrapper: WrapperGetter,
    pub(crate) sandbox: Option<SandboxContainer>,
    pub(crate) global: Arc<dyn GlobalEnvironment>,
    pub(crate) hooks: LifecycleHooks,
    pub(crate) lifecycles: Lifecycles,
    /// The element created at load time; replaced when a parcel creates a
    /// new one, cleared when a parcel unmounts.
    pub(crate) initial_element: Mutex<Option<Element>>,
    pub(crate) loaded_at: Instant,
}

/// Produces a fresh parcel for every activation of a loaded tenant.
#[derive(Clone)]
pub struct ParcelFactory {
    tenant: Arc<LoadedTenant>,
}

impl ParcelFactory {
    pub(crate) fn new(tenant: LoadedTenant) -> Self {
        Self {
            tenant: Arc::new(tenant),
        }
    }

    /// The tenant instance name.
    pub fn name(&self) -> &str {
        &self.tenant.instance
    }

    /// The global the tenant's code runs against.
    pub fn global(&self) -> Arc<dyn GlobalEnvironment> {
        self.tenant.global.clone()
    }

    /// The tenant's sandbox, absent when isolation is disabled.
    pub fn sandbox(&self) -> Option<&SandboxContainer> {
        self.tenant.sandbox.as_ref()
    }

    /// A parcel mounting into `container`, or into the tenant's registered
    /// container when `None`.
    pub fn create(&self, container: Option<Container>) -> ParcelConfig {
        let container = container.or_else(|| self.tenant.app.container.clone());
        ParcelConfig {
            tenant: self.tenant.clone(),
            container,
            element: Mutex::new(None),
            deferred: Mutex::new(None),
        }
    }
}

impl fmt::Debug for ParcelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParcelFactory")
            .field("name", &self.tenant.instance)
            .finish()
    }
}

/// One activation of a tenant.
pub struct ParcelConfig {
    tenant: Arc<LoadedTenant>,
    container: Option<Container>,
    element: Mutex<Option<Element>>,
    deferred: Mutex<Option<Arc<Deferred>>>,
}

impl ParcelConfig {
    pub fn name(&self) -> &str {
        &self.tenant.instance
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    /// The wrapper element while mounted.
    pub fn element(&self) -> Option<Element> {
        self.element.lock().clone()
    }

    pub fn mount_steps(&self) -> &'static [MountStep] {
        &MOUNT_STEPS
    }

    pub fn unmount_steps(&self) -> &'static [UnmountStep] {
        &UNMOUNT_STEPS
    }

    pub fn has_update(&self) -> bool {
        self.tenant.lifecycles.update.is_some()
    }

    pub async fn bootstrap(&self, props: &ObjectRef) -> Result<()> {
        let tenant = &self.tenant;
        let result = tenant
            .lifecycles
            .bootstrap
            .invoke(Value::Undefined, vec![Value::Object(self.props(props, None))])
            .await;
        tenant.ctx.end_turn();
        result
            .map(|_| ())
            .map_err(|e| self.phase_failed("bootstrap", 0, e))
    }

    /// Run every mount step in order.
    pub async fn mount(&self, props: &ObjectRef) -> Result<()> {
        for (index, step) in MOUNT_STEPS.iter().enumerate() {
            debug!("{} mount step {:?}", self.name(), step);
            let result = self.run_mount_step(*step, props).await;
            self.tenant.ctx.end_turn();
            result.map_err(|e| self.phase_failed("mount", index, e))?;
        }

        if self.tenant.ctx.is_development() {
            info!(
                "App {} loading consuming {:?}",
                self.name(),
                self.tenant.loaded_at.elapsed()
            );
        }
        Ok(())
    }

    /// Run every unmount step in order.
    pub async fn unmount(&self, props: &ObjectRef) -> Result<()> {
        for (index, step) in UNMOUNT_STEPS.iter().enumerate() {
            debug!("{} unmount step {:?}", self.name(), step);
            let result = self.run_unmount_step(*step, props).await;
            self.tenant.ctx.end_turn();
            result.map_err(|e| self.phase_failed("unmount", index, e))?;
        }
        Ok(())
    }

    /// Call the tenant's `update`. Tenants that export none accept every
    /// update as a no-op.
    pub async fn update(&self, props: &ObjectRef) -> Result<()> {
        let Some(update) = &self.tenant.lifecycles.update else {
            return Ok(());
        };
        let element = self.element.lock().clone();
        let container = self.tenant.wrapper.get(element.as_ref()).ok();
        let result = update
            .invoke(Value::Undefined, vec![Value::Object(self.props(props, container))])
            .await;
        self.tenant.ctx.end_turn();
        result
            .map(|_| ())
            .map_err(|e| self.phase_failed("update", 0, e))
    }

    async fn run_mount_step(&self, step: MountStep, props: &ObjectRef) -> Result<()> {
        let tenant = &self.tenant;
        match step {
            MountStep::AwaitSingular => {
                if tenant.singular {
                    tenant.barrier.wait().await;
                }
            }
            MountStep::PrepareWrapper => {
                *self.element.lock() = tenant.initial_element.lock().clone();
            }
            MountStep::RenderMounting => {
                let new_container = self.container != tenant.app.container;
                let element = {
                    let mut slot = self.element.lock();
                    if new_container || slot.is_none() {
                        let fresh = tenant.elements.create();
                        *tenant.initial_element.lock() = Some(fresh.clone());
                        *slot = Some(fresh);
                    }
                    slot.clone()
                };
                tenant.renderer.render(
                    element.as_ref(),
                    true,
                    self.container.as_ref(),
                    RenderPhase::Mounting,
                )?;
            }
            MountStep::MountSandbox => {
                if let Some(sandbox) = &tenant.sandbox {
                    sandbox.mount()?;
                }
            }
            MountStep::BeforeMountHooks => {
                run_chain(&tenant.hooks.before_mount, &tenant.app, &tenant.global).await?;
            }
            MountStep::MountTenant => {
                let element = self.element.lock().clone();
                let wrapper = tenant.wrapper.get(element.as_ref())?;
                let props = self.props(props, Some(wrapper));
                tenant
                    .lifecycles
                    .mount
                    .invoke(Value::Undefined, vec![Value::Object(props)])
                    .await?;
            }
            MountStep::RenderMounted => {
                let element = self.element.lock().clone();
                tenant.renderer.render(
                    element.as_ref(),
                    false,
                    self.container.as_ref(),
                    RenderPhase::Mounted,
                )?;
            }
            MountStep::AfterMountHooks => {
                run_chain(&tenant.hooks.after_mount, &tenant.app, &tenant.global).await?;
            }
            MountStep::ArmBarrier => {
                if tenant.singular {
                    *self.deferred.lock() = Some(tenant.barrier.arm());
                }
            }
        }
        Ok(())
    }

    async fn run_unmount_step(&self, step: UnmountStep, props: &ObjectRef) -> Result<()> {
        let tenant = &self.tenant;
        match step {
            UnmountStep::BeforeUnmountHooks => {
                run_chain(&tenant.hooks.before_unmount, &tenant.app, &tenant.global).await?;
            }
            UnmountStep::UnmountTenant => {
                let element = self.element.lock().clone();
                let wrapper = tenant.wrapper.get(element.as_ref())?;
                let props = self.props(props, Some(wrapper));
                tenant
                    .lifecycles
                    .unmount
                    .invoke(Value::Undefined, vec![Value::Object(props)])
                    .await?;
            }
            UnmountStep::UnmountSandbox => {
                if let Some(sandbox) = &tenant.sandbox {
                    sandbox.unmount()?;
                }
            }
            UnmountStep::AfterUnmountHooks => {
                run_chain(&tenant.hooks.after_unmount, &tenant.app, &tenant.global).await?;
            }
            UnmountStep::ClearContainer => {
                tenant.renderer.render(
                    None,
                    false,
                    self.container.as_ref(),
                    RenderPhase::Unmounted,
                )?;
                *self.element.lock() = None;
                *tenant.initial_element.lock() = None;
            }
            UnmountStep::ReleaseBarrier => {
                if let Some(deferred) = self.deferred.lock().take() {
                    deferred.resolve();
                }
            }
        }
        Ok(())
    }

    /// Registered props, then caller props, then the tenant's `name` and,
    /// when known, its `container`.
    fn props(&self, props: &ObjectRef, container: Option<Element>) -> ObjectRef {
        let merged = ObjectRef::from_entries(self.tenant.app.props.entries());
        for (key, value) in props.entries() {
            merged.set(key, value);
        }
        merged.set("name", self.tenant.instance.as_str());
        if let Some(container) = container {
            merged.set("container", container);
        }
        merged
    }

    fn phase_failed(&self, phase: &str, step: usize, source: Error) -> Error {
        LifecycleError::PhaseFailed {
            tenant: self.tenant.instance.clone(),
            phase: phase.to_string(),
            step,
            source: Box::new(source),
        }
        .into()
    }
}

impl fmt::Debug for ParcelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParcelConfig")
            .field("name", &self.tenant.instance)
            .field("container", &self.container)
            .field("mounted", &self.element.lock().is_some())
            .finish()
    }
}
