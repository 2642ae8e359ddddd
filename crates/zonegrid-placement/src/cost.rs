//! Cost functions and the cost-function registry.
//!
//! A cost function scores one host for one request; lower is better.
//! Functions are registered explicitly under a qualified name
//! (`namespace.function`). Configuration names them either qualified or
//! short; short names live in the [`LOCAL_NAMESPACE`].
//!
//! A function applies to a topic only if its short name starts with
//! `<topic>_` or with `noop`. Its coefficient comes from the weight flag
//! `<function>_weight`. The resolved list is cached per topic for the
//! lifetime of the registry, since cost-function configuration does not
//! change at runtime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use zonegrid_core::SchedulerConfig;

use crate::error::PlacementError;
use crate::host_state::HostState;
use crate::properties::FilterProperties;

/// Namespace that short cost-function names expand into.
pub const LOCAL_NAMESPACE: &str = "least_cost";

/// Scores a host for a request. Lower cost wins.
pub type CostFn = fn(&HostState, &FilterProperties) -> f64;

/// A resolved cost function with its weight coefficient.
#[derive(Debug, Clone)]
pub struct CostFunctionEntry {
    /// Qualified name, e.g. `least_cost.noop_cost_fn`.
    pub name: String,
    pub weight: f64,
    pub function: CostFn,
}

/// Constant cost; useful as a placeholder in configuration.
pub fn noop_cost_fn(_host: &HostState, _props: &FilterProperties) -> f64 {
    1.0
}

/// Prefer the host with the least free memory, filling hosts one by one.
pub fn compute_fill_first_cost_fn(host: &HostState, _props: &FilterProperties) -> f64 {
    host.free_ram_mb as f64
}

/// Registry of named cost functions plus the per-topic resolution cache.
#[derive(Debug, Default)]
pub struct CostFunctionRegistry {
    functions: HashMap<String, CostFn>,
    cache: RwLock<HashMap<String, Arc<Vec<CostFunctionEntry>>>>,
}

impl CostFunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `least_cost` functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(format!("{LOCAL_NAMESPACE}.noop_cost_fn"), noop_cost_fn);
        registry.register(
            format!("{LOCAL_NAMESPACE}.compute_fill_first_cost_fn"),
            compute_fill_first_cost_fn,
        );
        registry
    }

    /// Register a function under its qualified name.
    ///
    /// Registration happens before the registry is shared; it does not
    /// invalidate lists already cached.
    pub fn register(&mut self, qualified_name: impl Into<String>, function: CostFn) {
        self.functions.insert(qualified_name.into(), function);
    }

    /// Resolve the configured cost functions that apply to `topic`.
    ///
    /// The first call for a topic resolves and caches the list; later
    /// calls return the same `Arc`. Concurrent first calls may both
    /// resolve, but only one result is kept.
    pub fn get_cost_functions(
        &self,
        topic: &str,
        config: &SchedulerConfig,
    ) -> Result<Arc<Vec<CostFunctionEntry>>, PlacementError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(topic) {
                return Ok(Arc::clone(cached));
            }
        }

        let resolved = Arc::new(self.resolve(topic, config)?);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache.entry(topic.to_string()).or_insert(resolved);
        Ok(Arc::clone(entry))
    }

    fn resolve(
        &self,
        topic: &str,
        config: &SchedulerConfig,
    ) -> Result<Vec<CostFunctionEntry>, PlacementError> {
        let topic_prefix = format!("{topic}_");
        let mut entries = Vec::new();

        for configured in &config.scheduler.least_cost_functions {
            let (qualified, short) = match configured.rsplit_once('.') {
                Some((_, short)) => (configured.clone(), short.to_string()),
                None => (format!("{LOCAL_NAMESPACE}.{configured}"), configured.clone()),
            };
            if !(short.starts_with(&topic_prefix) || short.starts_with("noop")) {
                continue;
            }

            let function = *self
                .functions
                .get(&qualified)
                .ok_or_else(|| PlacementError::CostFunctionNotFound(qualified.clone()))?;

            let flag_name = format!("{short}_weight");
            let weight = config
                .weight(&flag_name)
                .ok_or(PlacementError::WeightFlagNotFound(flag_name))?;

            debug!(%topic, function = %qualified, weight, "cost function resolved");
            entries.push(CostFunctionEntry {
                name: qualified,
                weight,
                function,
            });
        }

        Ok(entries)
    }
}
