//! Subcommands of the warden binary.

pub mod check_config;
pub mod simulate;
