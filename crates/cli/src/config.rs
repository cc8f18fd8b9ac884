use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use cachet_gate_core::{GateOptions, OnSourceFailure, RegistryConfig, SourceConfig};
use serde::{Deserialize, Serialize};

/// `cachet-gate.toml` contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrySection {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub on_source_failure: OnSourceFailure,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            on_source_failure: OnSourceFailure::default(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    60
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateSection {
    /// When false the `gate` command only reports statuses.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Omit to wait forever.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: None,
            resources: vec![],
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads `path` if it exists, otherwise starts from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            sources: self.sources.clone(),
            refresh_interval_secs: self.registry.refresh_interval_secs,
            on_source_failure: self.registry.on_source_failure,
        }
    }

    pub fn gate_options(&self) -> GateOptions {
        GateOptions {
            poll_interval: Duration::from_secs(self.gate.poll_interval_secs),
            max_wait: self.gate.max_wait_secs.map(Duration::from_secs),
        }
    }
}
