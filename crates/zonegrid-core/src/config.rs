//! Scheduler configuration (TOML).
//!
//! Every section and field has a default so an empty file is a valid
//! config. Cost-function weights are looked up by flag name
//! (`<function>_weight`); the built-in functions carry default weights
//! that a `[weights]` table can override.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Weights applied when the `[weights]` table does not name a flag.
const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    ("noop_cost_fn_weight", 1.0),
    ("compute_fill_first_cost_fn_weight", 1.0),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Cost-function weight coefficients keyed `<function>_weight`.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub zones: ZonesSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Ordered cost-function identifiers, short (`noop_cost_fn`) or
    /// qualified (`least_cost.noop_cost_fn`).
    #[serde(default = "default_cost_functions")]
    pub least_cost_functions: Vec<String>,
    /// Skip the child-zone fan-out entirely.
    #[serde(default)]
    pub local_zone_only: bool,
    /// Shared secret for build-plan blobs. Blob features are disabled
    /// when unset.
    #[serde(default)]
    pub build_plan_encryption_key: Option<String>,
    /// Per-zone timeout for remote `select` calls.
    #[serde(default = "default_zone_call_timeout")]
    pub zone_call_timeout_secs: u64,
    /// Host filter names, applied as a logical AND.
    #[serde(default = "default_host_filters")]
    pub host_filters: Vec<String>,
    /// JSON file with free-form scheduler options, reloaded on change.
    #[serde(default)]
    pub options_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonesSection {
    /// Seconds between refreshing the zone list from storage.
    #[serde(default = "default_db_check_interval")]
    pub db_check_interval_secs: u64,
    /// Consecutive poll failures before a zone is marked inactive.
    #[serde(default = "default_failures_to_offline")]
    pub failures_to_offline: u32,
}

fn default_cost_functions() -> Vec<String> {
    vec!["least_cost.compute_fill_first_cost_fn".to_string()]
}

fn default_zone_call_timeout() -> u64 {
    30
}

fn default_host_filters() -> Vec<String> {
    vec!["all_hosts".to_string()]
}

fn default_db_check_interval() -> u64 {
    60
}

fn default_failures_to_offline() -> u32 {
    3
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            least_cost_functions: default_cost_functions(),
            local_zone_only: false,
            build_plan_encryption_key: None,
            zone_call_timeout_secs: default_zone_call_timeout(),
            host_filters: default_host_filters(),
            options_path: None,
        }
    }
}

impl Default for ZonesSection {
    fn default() -> Self {
        Self {
            db_check_interval_secs: default_db_check_interval(),
            failures_to_offline: default_failures_to_offline(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Look up a weight flag such as `noop_cost_fn_weight`.
    pub fn weight(&self, flag_name: &str) -> Option<f64> {
        self.weights.get(flag_name).copied().or_else(|| {
            DEFAULT_WEIGHTS
                .iter()
                .find(|(name, _)| *name == flag_name)
                .map(|(_, w)| *w)
        })
    }

    pub fn zone_call_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.zone_call_timeout_secs)
    }

    pub fn db_check_interval(&self) -> Duration {
        Duration::from_secs(self.zones.db_check_interval_secs)
    }

    /// The build-plan key, treating an empty string as unset.
    pub fn encryption_key(&self) -> Option<&str> {
        self.scheduler
            .build_plan_encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
    }
}
