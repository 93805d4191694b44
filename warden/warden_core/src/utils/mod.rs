//! Utility types shared across the Warden crates.

pub mod logging;

pub use logging::LogLevel;
