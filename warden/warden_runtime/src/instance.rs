//! Per-tenant lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use warden_core::error::LifecycleError;
use warden_core::{Error, ObjectRef, Result};

use crate::collaborators::{Container, TenantApp};
use crate::hooks::LifecycleHooks;
use crate::loader::Orchestrator;
use crate::parcel::{ParcelConfig, ParcelFactory};

/// Where a tenant instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantState {
    NotLoaded,
    Loading,
    Loaded,
    Bootstrapping,
    Idle,
    Mounting,
    Mounted,
    Unmounting,
    MountFailed,
    UnmountFailed,
    LoadError,
    Disposed,
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TenantState::NotLoaded => "not loaded",
            TenantState::Loading => "loading",
            TenantState::Loaded => "loaded",
            TenantState::Bootstrapping => "bootstrapping",
            TenantState::Idle => "idle",
            TenantState::Mounting => "mounting",
            TenantState::Mounted => "mounted",
            TenantState::Unmounting => "unmounting",
            TenantState::MountFailed => "mount failed",
            TenantState::UnmountFailed => "unmount failed",
            TenantState::LoadError => "load error",
            TenantState::Disposed => "disposed",
        };
        write!(f, "{name}")
    }
}

/// Drives one tenant through load, bootstrap, mount and unmount.
///
/// Bootstrap runs once, before the first mount. A failed mount leaves the
/// instance in [`TenantState::MountFailed`] with its sandbox as the failing
/// step left it; calling [`TenantInstance::unmount`] from there unwinds it.
pub struct TenantInstance {
    orchestrator: Arc<Orchestrator>,
    app: TenantApp,
    hooks: LifecycleHooks,
    state: Mutex<TenantState>,
    factory: Mutex<Option<ParcelFactory>>,
    parcel: Mutex<Option<Arc<ParcelConfig>>>,
    bootstrapped: AtomicBool,
}

impl TenantInstance {
    pub fn new(orchestrator: Arc<Orchestrator>, app: TenantApp, hooks: LifecycleHooks) -> Self {
        Self {
            orchestrator,
            app,
            hooks,
            state: Mutex::new(TenantState::NotLoaded),
            factory: Mutex::new(None),
            parcel: Mutex::new(None),
            bootstrapped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TenantState {
        *self.state.lock()
    }

    /// The instance name, known once loaded.
    pub fn name(&self) -> Option<String> {
        self.factory.lock().as_ref().map(|f| f.name().to_string())
    }

    /// The factory produced by loading.
    pub fn factory(&self) -> Option<ParcelFactory> {
        self.factory.lock().clone()
    }

    /// The parcel of the current or last activation.
    pub fn parcel(&self) -> Option<Arc<ParcelConfig>> {
        self.parcel.lock().clone()
    }

    /// Move to `next` if the current state is one of `from`.
    fn transition(&self, action: &str, from: &[TenantState], next: TenantState) -> Result<TenantState> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(self.invalid(action, *state));
        }
        let previous = *state;
        *state = next;
        Ok(previous)
    }

    fn settle(&self, next: TenantState) {
        *self.state.lock() = next;
    }

    pub async fn load(&self) -> Result<()> {
        self.transition(
            "load",
            &[TenantState::NotLoaded, TenantState::LoadError],
            TenantState::Loading,
        )?;

        match self
            .orchestrator
            .load_tenant(self.app.clone(), self.hooks.clone())
            .await
        {
            Ok(factory) => {
                *self.factory.lock() = Some(factory);
                self.settle(TenantState::Loaded);
                Ok(())
            }
            Err(e) => {
                warn!("Loading {} failed: {}", self.app.name, e);
                self.settle(TenantState::LoadError);
                Err(e)
            }
        }
    }

    /// Mount into `container`, or the registered container when `None`.
    /// Loads and bootstraps first when needed.
    pub async fn mount(&self, container: Option<Container>, props: ObjectRef) -> Result<()> {
        if matches!(self.state(), TenantState::NotLoaded | TenantState::LoadError) {
            self.load().await?;
        }

        let previous = self.transition(
            "mount",
            &[TenantState::Loaded, TenantState::Idle],
            TenantState::Mounting,
        )?;
        let Some(factory) = self.factory() else {
            self.settle(previous);
            return Err(self.invalid("mount", previous));
        };
        let parcel = Arc::new(factory.create(container));

        if !self.bootstrapped.load(Ordering::Acquire) {
            self.settle(TenantState::Bootstrapping);
            if let Err(e) = parcel.bootstrap(&props).await {
                // Nothing was mounted, so there is nothing for unmount to unwind.
                self.parcel.lock().take();
                self.settle(TenantState::MountFailed);
                return Err(e);
            }
            self.bootstrapped.store(true, Ordering::Release);
            self.settle(TenantState::Mounting);
        }
        *self.parcel.lock() = Some(parcel.clone());

        match parcel.mount(&props).await {
            Ok(()) => {
                info!("Mounted {}", parcel.name());
                self.settle(TenantState::Mounted);
                Ok(())
            }
            Err(e) => {
                warn!("Mounting {} failed: {}", parcel.name(), e);
                self.settle(TenantState::MountFailed);
                Err(e)
            }
        }
    }

    pub async fn unmount(&self, props: ObjectRef) -> Result<()> {
        self.transition(
            "unmount",
            &[
                TenantState::Mounted,
                TenantState::MountFailed,
                TenantState::UnmountFailed,
            ],
            TenantState::Unmounting,
        )?;

        let Some(parcel) = self.parcel() else {
            self.settle(TenantState::Idle);
            return Ok(());
        };

        match parcel.unmount(&props).await {
            Ok(()) => {
                info!("Unmounted {}", parcel.name());
                self.settle(TenantState::Idle);
                Ok(())
            }
            Err(e) => {
                warn!("Unmounting {} failed: {}", parcel.name(), e);
                self.settle(TenantState::UnmountFailed);
                Err(e)
            }
        }
    }

    /// Pass new props to a mounted tenant.
    pub async fn update(&self, props: ObjectRef) -> Result<()> {
        let state = self.state();
        let parcel = match (state, self.parcel()) {
            (TenantState::Mounted, Some(parcel)) => parcel,
            _ => return Err(self.invalid("update", state)),
        };
        parcel.update(&props).await
    }

    /// Drop the loaded tenant. Not allowed while it is mounted or between
    /// phases.
    pub fn dispose(&self) -> Result<()> {
        self.transition(
            "dispose",
            &[
                TenantState::NotLoaded,
                TenantState::Loaded,
                TenantState::Idle,
                TenantState::LoadError,
                TenantState::Disposed,
            ],
            TenantState::Disposed,
        )?;
        self.parcel.lock().take();
        self.factory.lock().take();
        Ok(())
    }

    fn invalid(&self, action: &str, state: TenantState) -> Error {
        LifecycleError::InvalidState {
            tenant: self.app.name.clone(),
            action: action.to_string(),
            state: state.to_string(),
        }
        .into()
    }
}

impl fmt::Debug for TenantInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantInstance")
            .field("app", &self.app.name)
            .field("state", &self.state())
            .finish()
    }
}
