//! Framework configuration
//!
//! Handles loading, validating and host-adjusting the configuration the
//! lifecycle orchestrator runs under.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use warden_core::error::ConfigError;
use warden_core::{LogLevel, Result};
use warden_isolation::HostCapabilities;

/// Fine-grained sandbox options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Render each tenant inside a shadow root
    #[serde(default)]
    pub strict_style_isolation: bool,

    /// Scope each tenant's style rules with a wrapper attribute
    #[serde(default)]
    pub experimental_style_isolation: bool,

    /// Use the single-tenant legacy boundary
    #[serde(default)]
    pub loose: bool,

    /// Enable the proxy boundary's fast paths
    #[serde(default = "default_speedy")]
    pub speedy: bool,
}

fn default_speedy() -> bool {
    true
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            strict_style_isolation: false,
            experimental_style_isolation: false,
            loose: false,
            speedy: default_speedy(),
        }
    }
}

/// Either a plain on/off switch or a full set of options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SandboxSetting {
    Enabled(bool),
    Options(SandboxConfig),
}

impl Default for SandboxSetting {
    fn default() -> Self {
        SandboxSetting::Enabled(true)
    }
}

impl SandboxSetting {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, SandboxSetting::Enabled(false))
    }

    /// The effective options; a bare `true` means all defaults.
    pub fn options(&self) -> SandboxConfig {
        match self {
            SandboxSetting::Options(options) => *options,
            SandboxSetting::Enabled(_) => SandboxConfig::default(),
        }
    }

    pub fn strict_style_isolation(&self) -> bool {
        matches!(self, SandboxSetting::Options(o) if o.strict_style_isolation)
    }

    /// Scoped CSS applies only when asked for and strict isolation is off.
    pub fn scoped_css(&self) -> bool {
        matches!(
            self,
            SandboxSetting::Options(o) if o.experimental_style_isolation && !o.strict_style_isolation
        )
    }

    pub fn loose(&self) -> bool {
        matches!(self, SandboxSetting::Options(o) if o.loose)
    }

    pub fn speedy(&self) -> bool {
        match self {
            SandboxSetting::Options(o) => o.speedy,
            SandboxSetting::Enabled(_) => true,
        }
    }

    fn with(self, adjust: impl FnOnce(&mut SandboxConfig)) -> Self {
        let mut options = self.options();
        adjust(&mut options);
        SandboxSetting::Options(options)
    }
}

/// Framework configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// At most one tenant mounted at a time
    #[serde(default)]
    pub singular: bool,

    /// Isolation settings
    #[serde(default)]
    pub sandbox: SandboxSetting,

    /// Development diagnostics
    #[serde(default)]
    pub development: bool,

    /// Log level for the host
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            singular: false,
            sandbox: SandboxSetting::default(),
            development: false,
            log_level: LogLevel::default(),
        }
    }
}

impl FrameworkConfig {
    /// Load configuration from a TOML file
    pub async fn load(path: Option<&str>) -> Result<Self> {
        let mut config = FrameworkConfig::default();

        if let Some(path) = path {
            info!("Loading configuration from {}", path);

            if !Path::new(path).exists() {
                warn!("Configuration file not found: {}", path);
                return Ok(config);
            }

            let content = fs::read_to_string(path).await?;
            config = Self::from_toml_str(&content)?;
        } else {
            info!("No configuration file specified, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let SandboxSetting::Options(options) = &self.sandbox {
            if options.strict_style_isolation && options.experimental_style_isolation {
                return Err(ConfigError::IncompatibleOptions(
                    "strictStyleIsolation".to_string(),
                    "experimentalStyleIsolation".to_string(),
                )
                .into());
            }

            if options.loose && !self.singular {
                warn!("Loose sandbox only isolates correctly when a single tenant is mounted at a time");
            }
        }

        Ok(())
    }

    /// Adjust the configuration to what the host supports. Hosts without
    /// interception fall back to the snapshot boundary; hosts without
    /// destructuring lose speedy mode.
    pub fn downgrade_for_host(&self, capabilities: HostCapabilities) -> Self {
        if !self.sandbox.is_enabled() {
            return self.clone();
        }

        if !capabilities.interception {
            warn!("Host lacks property interception, the proxy sandbox will degenerate into the snapshot sandbox");
            if !self.singular {
                warn!("Setting singular as false may cause unexpected behavior while the host lacks property interception");
            }
            return Self {
                sandbox: self.sandbox.with(|o| o.loose = true),
                ..self.clone()
            };
        }

        if !capabilities.destructuring && self.sandbox.speedy() {
            warn!("Speedy mode will turn off as destructuring assignment is not supported by the host");
            return Self {
                sandbox: self.sandbox.with(|o| o.speedy = false),
                ..self.clone()
            };
        }

        self.clone()
    }
}
