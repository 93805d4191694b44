//! # Warden Core
//!
//! `warden_core` provides the building blocks shared by every part of the
//! Warden tenant host: independently built applications ("tenants") that run
//! side by side against one shared, mutable global environment.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for all Warden components
//! - **value**: Property keys, values, callables and property descriptors
//! - **traits**: The `GlobalEnvironment` capability table
//! - **global**: The real shared global
//! - **host**: Timer and event-listener services behind the native functions
//! - **dom**: A minimal element/document model
//! - **utils**: Log levels and other small helpers

pub mod dom;
pub mod error;
pub mod global;
pub mod host;
pub mod traits;
pub mod utils;
pub mod value;

// Re-export key types and traits for convenience
pub use dom::{Document, Element};
pub use error::{Error, Result};
pub use global::SharedGlobal;
pub use host::{HostServices, TimerId};
pub use traits::{GlobalEnvironment, GlobalEnvironmentExt, GlobalRef, Prototype};
pub use utils::LogLevel;
pub use value::{Function, FunctionKind, ObjectRef, PropertyDescriptor, PropertyKey, Value};
