use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::planner::types::Op;
use crate::safety::policy::SafetyClass;

/// Top-level configuration. Every section and field has a default, so an
/// empty TOML document is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extractor: ExtractorConfig,
    pub session: SessionConfig,
    pub execution: ExecutionConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Below this the verb is forced to Clarify.
    pub confidence_threshold: f32,
    /// Multiplier per fuzzy or literal resolution.
    pub fuzzy_penalty: f32,
    /// Multiplier applied once if any deictic resolution happened.
    pub deictic_penalty: f32,
    pub max_edit_distance: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            fuzzy_penalty: 0.7,
            deictic_penalty: 0.5,
            max_edit_distance: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
    pub history_limit: usize,
    /// Where session records are written. `None` disables persistence.
    pub persist_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 30 * 60,
            history_limit: 20,
            persist_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_timeout_ms: u64,
    /// Keyed by op name (`install`, `update`, ...).
    pub op_timeouts_ms: BTreeMap<String, u64>,
    /// Simulate every plan instead of executing it.
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let mut op_timeouts_ms = BTreeMap::new();
        op_timeouts_ms.insert(Op::Update.to_string(), 30 * 60 * 1000);
        op_timeouts_ms.insert(Op::Search.to_string(), 60 * 1000);
        op_timeouts_ms.insert(Op::ListGenerations.to_string(), 30 * 1000);
        op_timeouts_ms.insert(Op::ListInstalled.to_string(), 30 * 1000);
        op_timeouts_ms.insert(Op::Diff.to_string(), 60 * 1000);
        Self {
            default_timeout_ms: 10 * 60 * 1000,
            op_timeouts_ms,
            dry_run: false,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout_for(&self, op: Op) -> Duration {
        let ms = self
            .op_timeouts_ms
            .get(op.as_str())
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Packages that may never be removed.
    pub critical_packages: Vec<String>,
    /// Services whose providing package may never be removed while running.
    pub critical_services: Vec<String>,
    /// Replaces the static class for an op (keyed by op name).
    pub overrides: BTreeMap<String, SafetyClass>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            critical_packages: owned(&["glibc", "systemd", "nix", "bash", "coreutils", "linux"]),
            critical_services: owned(&["NetworkManager", "systemd-resolved", "nix-daemon"]),
            overrides: BTreeMap::new(),
        }
    }
}

impl PolicyConfig {
    pub fn parsed_overrides(&self) -> Result<BTreeMap<Op, SafetyClass>, ConfigError> {
        self.overrides
            .iter()
            .map(|(name, class)| {
                name.parse::<Op>()
                    .map(|op| (op, *class))
                    .map_err(ConfigError::Invalid)
            })
            .collect()
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} must be within 0..=1, got {}", name, v)))
            }
        };
        unit("extractor.confidence_threshold", self.extractor.confidence_threshold)?;
        unit("extractor.fuzzy_penalty", self.extractor.fuzzy_penalty)?;
        unit("extractor.deictic_penalty", self.extractor.deictic_penalty)?;

        if self.session.history_limit == 0 {
            return Err(ConfigError::Invalid("session.history_limit must be positive".into()));
        }
        if self.execution.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("execution.default_timeout_ms must be positive".into()));
        }
        for name in self.execution.op_timeouts_ms.keys() {
            name.parse::<Op>().map_err(ConfigError::Invalid)?;
        }
        self.policy.parsed_overrides()?;
        Ok(())
    }
}
