//! Host filters.
//!
//! A filter is a pure predicate over a host snapshot and the request's
//! filter properties. A host stays a candidate only if every filter in
//! the chain passes it, so filter order affects cost, not results.

use std::fmt;

use tracing::debug;

use crate::error::PlacementError;
use crate::host_state::{HostState, disk_mb, ram_mb};
use crate::properties::FilterProperties;

/// A predicate deciding whether a host can take the requested instance.
pub trait HostFilter: Send + Sync + fmt::Debug {
    /// Registry name of the filter.
    fn name(&self) -> &'static str;

    /// Passes every host unless overridden.
    fn host_passes(&self, _host: &HostState, _props: &FilterProperties) -> bool {
        true
    }
}

/// Lets every host through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl HostFilter for PassThroughFilter {
    fn name(&self) -> &'static str {
        "all_hosts"
    }
}

/// Host must be enabled and advertise every extra spec of the flavor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeFilter;

impl HostFilter for ComputeFilter {
    fn name(&self) -> &'static str {
        "compute"
    }

    fn host_passes(&self, host: &HostState, props: &FilterProperties) -> bool {
        host.enabled
            && props
                .instance_type
                .extra_specs
                .iter()
                .all(|(k, v)| host.capabilities.get(k) == Some(v))
    }
}

/// Host must have enough free memory for the flavor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RamFilter;

impl HostFilter for RamFilter {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn host_passes(&self, host: &HostState, props: &FilterProperties) -> bool {
        host.free_ram_mb >= ram_mb(props.instance_type.memory_mb)
    }
}

/// Host must have enough free vCPUs. Hosts that do not report a vCPU
/// total are not judged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreFilter;

impl HostFilter for CoreFilter {
    fn name(&self) -> &'static str {
        "core"
    }

    fn host_passes(&self, host: &HostState, props: &FilterProperties) -> bool {
        host.vcpus_total == 0 || host.free_vcpus() >= props.instance_type.vcpus
    }
}

/// Host must have enough free disk for root plus ephemeral storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFilter;

impl HostFilter for DiskFilter {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn host_passes(&self, host: &HostState, props: &FilterProperties) -> bool {
        let it = &props.instance_type;
        host.free_disk_mb >= disk_mb(it.root_gb, it.ephemeral_gb)
    }
}

/// Resolve a filter by its registry name.
pub fn filter_by_name(name: &str) -> Result<Box<dyn HostFilter>, PlacementError> {
    let filter: Box<dyn HostFilter> = match name {
        "all_hosts" => Box::new(PassThroughFilter),
        "compute" => Box::new(ComputeFilter),
        "ram" => Box::new(RamFilter),
        "core" => Box::new(CoreFilter),
        "disk" => Box::new(DiskFilter),
        other => return Err(PlacementError::FilterNotFound(other.to_string())),
    };
    Ok(filter)
}

/// The active filters of a scheduler, applied as a logical AND.
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn HostFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn HostFilter>>) -> Self {
        Self { filters }
    }

    /// Build a chain from configured filter names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PlacementError> {
        let filters = names
            .iter()
            .map(|n| filter_by_name(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn passes(&self, host: &HostState, props: &FilterProperties) -> bool {
        self.filters.iter().all(|f| {
            let ok = f.host_passes(host, props);
            if !ok {
                debug!(host = %host.host, filter = f.name(), "host filtered out");
            }
            ok
        })
    }

    /// Keep only the hosts that pass every filter.
    pub fn filter_hosts(&self, hosts: Vec<HostState>, props: &FilterProperties) -> Vec<HostState> {
        hosts.into_iter().filter(|h| self.passes(h, props)).collect()
    }
}
