//! Host state snapshots and the in-memory host manager.
//!
//! Compute services report their capabilities periodically; the
//! [`HostManager`] keeps the latest report per host and hands out fresh
//! [`HostState`] snapshots for each scheduling pass. Snapshots are
//! scratch state: consuming resources from one never touches the report.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use zonegrid_core::RequestContext;
use zonegrid_state::InstanceProperties;

/// Resource and capability snapshot for a single host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub host: String,
    /// Service topic the host serves, e.g. "compute".
    pub topic: String,
    pub enabled: bool,
    /// Free memory; may go negative once consumption overcommits.
    pub free_ram_mb: i64,
    pub free_disk_mb: i64,
    pub vcpus_total: u32,
    pub vcpus_used: u32,
    /// Free-form capabilities matched against instance-type extra specs.
    pub capabilities: HashMap<String, String>,
}

impl HostState {
    /// A state carrying only host identity, used to route a decoded
    /// build plan. It is not a resource snapshot.
    pub fn stub(host: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            topic: topic.into(),
            enabled: true,
            free_ram_mb: 0,
            free_disk_mb: 0,
            vcpus_total: 0,
            vcpus_used: 0,
            capabilities: HashMap::new(),
        }
    }

    fn from_report(host: &str, topic: &str, report: &CapabilityReport) -> Self {
        Self {
            host: host.to_string(),
            topic: topic.to_string(),
            enabled: report.enabled,
            free_ram_mb: report.free_ram_mb,
            free_disk_mb: report.free_disk_mb,
            vcpus_total: report.vcpus_total,
            vcpus_used: report.vcpus_used,
            capabilities: report.capabilities.clone(),
        }
    }

    pub fn free_vcpus(&self) -> u32 {
        self.vcpus_total.saturating_sub(self.vcpus_used)
    }

    /// Virtually reserve the resources of one instance on this host.
    pub fn consume_from_instance(&mut self, props: &InstanceProperties) {
        self.free_ram_mb = self.free_ram_mb.saturating_sub(ram_mb(props.memory_mb));
        self.free_disk_mb = self
            .free_disk_mb
            .saturating_sub(disk_mb(props.root_gb, props.ephemeral_gb));
        self.vcpus_used = self.vcpus_used.saturating_add(props.vcpus);
    }
}

/// Requested memory as a signed amount, clamped at `i64::MAX`.
pub(crate) fn ram_mb(memory_mb: u64) -> i64 {
    i64::try_from(memory_mb).unwrap_or(i64::MAX)
}

/// Requested root plus ephemeral disk in MB, clamped at `i64::MAX`.
pub(crate) fn disk_mb(root_gb: u64, ephemeral_gb: u64) -> i64 {
    let mb = root_gb.saturating_add(ephemeral_gb).saturating_mul(1024);
    i64::try_from(mb).unwrap_or(i64::MAX)
}

/// Capabilities reported by a service running on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub free_ram_mb: i64,
    pub free_disk_mb: i64,
    #[serde(default)]
    pub vcpus_total: u32,
    #[serde(default)]
    pub vcpus_used: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// Source of fresh host snapshots for a scheduling pass.
pub trait HostStateSource: Send + Sync {
    /// All hosts currently serving `topic`, as independent snapshots.
    fn get_all_host_states(&self, ctx: &RequestContext, topic: &str) -> Vec<HostState>;
}

/// Keeps the latest capability report of every service on every host.
#[derive(Debug, Default)]
pub struct HostManager {
    /// topic → host → latest report. Ordered so passes iterate hosts
    /// deterministically.
    reports: RwLock<BTreeMap<String, BTreeMap<String, CapabilityReport>>>,
}

impl HostManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a capability update from `service` on `host`.
    pub fn update_service_capabilities(
        &self,
        service: &str,
        host: &str,
        report: CapabilityReport,
    ) {
        debug!(%service, %host, free_ram_mb = report.free_ram_mb, "capabilities updated");
        let mut reports = self.reports.write().unwrap_or_else(|e| e.into_inner());
        reports
            .entry(service.to_string())
            .or_default()
            .insert(host.to_string(), report);
    }

    /// Forget a host for a service, e.g. once it is decommissioned.
    pub fn remove_host(&self, service: &str, host: &str) -> bool {
        let mut reports = self.reports.write().unwrap_or_else(|e| e.into_inner());
        reports
            .get_mut(service)
            .is_some_and(|hosts| hosts.remove(host).is_some())
    }

    /// `(host, service)` pairs for every known report.
    pub fn get_host_list(&self) -> Vec<(String, String)> {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        reports
            .iter()
            .flat_map(|(service, hosts)| {
                hosts.keys().map(move |host| (host.clone(), service.clone()))
            })
            .collect()
    }
}

impl HostStateSource for HostManager {
    fn get_all_host_states(&self, _ctx: &RequestContext, topic: &str) -> Vec<HostState> {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        reports
            .get(topic)
            .map(|hosts| {
                hosts
                    .iter()
                    .map(|(host, report)| HostState::from_report(host, topic, report))
                    .collect()
            })
            .unwrap_or_default()
    }
}
