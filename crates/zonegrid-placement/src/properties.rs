//! Per-request filter properties.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use zonegrid_core::RequestContext;
use zonegrid_state::{InstanceType, RequestSpec};

/// Everything filters and cost functions may inspect about a request.
///
/// Built once when a request enters the scheduler and dropped when it
/// completes. Extensions go through [`FilterProperties::insert_extra`].
#[derive(Debug, Clone)]
pub struct FilterProperties {
    /// Elevated context of the caller.
    pub context: RequestContext,
    pub request_spec: RequestSpec,
    /// Free-form scheduler options at the time of the request.
    pub config_options: Map<String, Value>,
    pub instance_type: InstanceType,
    /// When set, child zones are not consulted.
    pub local_zone_only: bool,
    extra: BTreeMap<String, Value>,
}

impl FilterProperties {
    pub fn new(
        context: RequestContext,
        request_spec: RequestSpec,
        config_options: Map<String, Value>,
        instance_type: InstanceType,
    ) -> Self {
        Self {
            context,
            request_spec,
            config_options,
            instance_type,
            local_zone_only: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_local_zone_only(mut self, local_zone_only: bool) -> Self {
        self.local_zone_only = local_zone_only;
        self
    }

    /// Attach an additional property for custom filters or weighers.
    pub fn insert_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
