//! Engine configuration loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use breadcrumb_core::{DropPolicyConfig, Resolution};

use crate::error::{EngineError, Result};

/// Configuration for the collection engine.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quantizer resolution for new blocks.
    #[serde(default)]
    pub resolution: Resolution,

    /// How long to wait for a location fix before rejecting with `NoFix`.
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,

    /// Default period of automatic drops.
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,

    /// Drop policy thresholds.
    #[serde(default)]
    pub policy: DropPolicyConfig,
}

fn default_fix_timeout_ms() -> u64 {
    15_000
}

fn default_collection_interval_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: DropPolicyConfig::default(),
            resolution: Resolution::DEFAULT,
            fix_timeout_ms: default_fix_timeout_ms(),
            collection_interval_secs: default_collection_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Short thresholds for tests and demos.
    pub fn testing() -> Self {
        Self {
            policy: DropPolicyConfig::testing(),
            fix_timeout_ms: 2_000,
            collection_interval_secs: 60,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.fix_timeout_ms == 0 {
            return Err(EngineError::Config("fix_timeout_ms must be positive".into()));
        }
        if self.collection_interval_secs == 0 {
            return Err(EngineError::Config(
                "collection_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }
}
