//! # Warden Runtime
//!
//! Lifecycle orchestration for tenants hosted on one shared global.
//!
//! The runtime loads a tenant through an [`AssetLoader`], evaluates it
//! inside a sandbox from `warden_isolation`, and sequences its bootstrap,
//! mount and unmount phases around that sandbox.
//!
//! ## Core Components
//!
//! - **Orchestrator**: Loads tenants and hands back a [`ParcelFactory`]
//! - **Parcel**: The ordered mount and unmount steps of one activation
//! - **Tenant Instance**: The per-tenant state machine driving parcels
//! - **Singular Barrier**: Serializes tenants when only one may be mounted
//! - **Hooks**: Caller hooks plus the built-in add-ons
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use warden_isolation::{HostCapabilities, HostContext};
//! use warden_runtime::{AssetLoader, FrameworkConfig, LifecycleHooks, Orchestrator, TenantApp, TenantInstance};
//! use warden_core::ObjectRef;
//!
//! # async fn run(loader: Arc<dyn AssetLoader>) -> warden_core::Result<()> {
//! let ctx = HostContext::browser(HostCapabilities::default());
//! let orchestrator = Arc::new(Orchestrator::new(ctx, FrameworkConfig::default(), loader)?);
//!
//! let app = TenantApp::new("alpha", "//alpha.example.com").with_container("#root");
//! let alpha = TenantInstance::new(orchestrator, app, LifecycleHooks::new());
//! alpha.mount(None, ObjectRef::new()).await?;
//! alpha.unmount(ObjectRef::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod barrier;
pub mod collaborators;
pub mod config;
pub mod hooks;
pub mod instance;
pub mod loader;
pub mod naming;
pub mod parcel;

// Re-export commonly used types
pub use barrier::{Deferred, SingularBarrier};
pub use collaborators::{
    AssetLoader, Container, ExecOptions, LegacyRender, PrefixStyleScoper, RenderArgs,
    StyleScoper, TenantApp, TenantPayload, TenantScript,
};
pub use config::{FrameworkConfig, SandboxConfig, SandboxSetting};
pub use hooks::{hook, Hook, LifecycleHooks};
pub use instance::{TenantInstance, TenantState};
pub use loader::exports::Lifecycles;
pub use loader::Orchestrator;
pub use parcel::{MountStep, ParcelConfig, ParcelFactory, UnmountStep};
