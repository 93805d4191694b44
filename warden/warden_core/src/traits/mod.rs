//! Core traits for the Warden host.

pub mod environment;

pub use environment::{GlobalEnvironment, GlobalEnvironmentExt, GlobalRef, Prototype};
