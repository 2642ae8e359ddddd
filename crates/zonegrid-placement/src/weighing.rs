//! Weighted hosts and the weighted-sum algorithm.
//!
//! A weight is a cost: candidates sort ascending and the lowest weight
//! wins. A weighted host is either local (it carries a host state) or
//! remote (it names a child zone and carries that zone's opaque blob).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use zonegrid_state::ZoneId;

use crate::cost::CostFunctionEntry;
use crate::host_state::HostState;
use crate::properties::FilterProperties;

/// A candidate placement with its total cost.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedHost {
    pub weight: f64,
    /// Set for local candidates.
    pub host_state: Option<HostState>,
    /// Opaque build plan from a child zone, or carried through a plan.
    pub blob: Option<String>,
    /// Set for remote candidates.
    pub zone: Option<ZoneId>,
}

/// Serializable view of a [`WeightedHost`], as returned by `select`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedHostRecord {
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneId>,
}

impl WeightedHost {
    pub fn local(weight: f64, host_state: HostState) -> Self {
        Self {
            weight,
            host_state: Some(host_state),
            blob: None,
            zone: None,
        }
    }

    pub fn remote(weight: f64, zone: ZoneId, blob: String) -> Self {
        Self {
            weight,
            host_state: None,
            blob: Some(blob),
            zone: Some(zone),
        }
    }

    /// Name of the local host, if this is a local candidate.
    pub fn host_name(&self) -> Option<&str> {
        self.host_state.as_ref().map(|s| s.host.as_str())
    }

    pub fn is_remote(&self) -> bool {
        self.zone.is_some()
    }

    /// Rebuild a candidate from its record. The host, if any, comes back
    /// as a [`HostState::stub`] under `topic`.
    pub fn from_record(record: WeightedHostRecord, topic: &str) -> Self {
        Self {
            weight: record.weight,
            host_state: record.host.map(|h| HostState::stub(h, topic)),
            blob: record.blob,
            zone: record.zone,
        }
    }

    pub fn to_record(&self) -> WeightedHostRecord {
        WeightedHostRecord {
            weight: self.weight,
            host: self.host_name().map(str::to_string),
            blob: self.blob.clone(),
            zone: self.zone.clone(),
        }
    }
}

/// Total cost of one host: Σ weight × cost over all cost functions.
pub fn host_cost(
    cost_fns: &[CostFunctionEntry],
    host: &HostState,
    props: &FilterProperties,
) -> f64 {
    cost_fns
        .iter()
        .map(|entry| entry.weight * (entry.function)(host, props))
        .sum()
}

/// The cheapest host among `hosts`, or `None` if there are none.
///
/// Ties go to the host seen first. Hosts with a NaN or infinite weight
/// never win.
pub fn weighted_sum<'a, I>(
    cost_fns: &[CostFunctionEntry],
    hosts: I,
    props: &FilterProperties,
) -> Option<WeightedHost>
where
    I: IntoIterator<Item = &'a HostState>,
{
    let mut best: Option<(f64, &HostState)> = None;
    for host in hosts {
        let weight = host_cost(cost_fns, host, props);
        if !weight.is_finite() {
            debug!(host = %host.host, weight, "host skipped: weight is not finite");
            continue;
        }
        debug!(host = %host.host, weight, "host weighed");
        match best {
            Some((best_weight, _)) if weight >= best_weight => {}
            _ => best = Some((weight, host)),
        }
    }
    best.map(|(weight, host)| WeightedHost::local(weight, host.clone()))
}

/// Stable ascending sort by weight. Incomparable weights keep their order.
pub fn sort_by_weight(hosts: &mut [WeightedHost]) {
    hosts.sort_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(Ordering::Equal));
}
