//! Local selection loop.
//!
//! Picks up to N hosts for N instances, one at a time:
//! 1. Drop hosts that no longer pass the filter chain
//! 2. Weigh the survivors and take the cheapest
//! 3. Virtually consume the instance's resources on the winner
//!
//! Step 3 makes every later iteration see the reduced capacity, so
//! fill-first weighing keeps stacking onto a host until a filter rejects it.

use tracing::{debug, info};

use crate::cost::CostFunctionEntry;
use crate::filters::FilterChain;
use crate::host_state::HostState;
use crate::properties::FilterProperties;
use crate::weighing::{WeightedHost, weighted_sum};

/// Host snapshots for one scheduling pass.
///
/// Owned by a single request; never shared between passes.
#[derive(Debug, Clone, Default)]
pub struct HostWorkingSet {
    hosts: Vec<HostState>,
}

impl HostWorkingSet {
    pub fn new(hosts: Vec<HostState>) -> Self {
        Self { hosts }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> &[HostState] {
        &self.hosts
    }

    pub fn get(&self, host: &str) -> Option<&HostState> {
        self.hosts.iter().find(|h| h.host == host)
    }

    /// Narrow the set to hosts passing every filter. Hosts dropped here
    /// stay dropped for the rest of the pass.
    pub fn retain_passing(&mut self, chain: &FilterChain, props: &FilterProperties) {
        self.hosts.retain(|h| chain.passes(h, props));
    }

    /// Reserve the resources of one instance on `host`. Returns `false`
    /// if the host is not in the set.
    pub fn consume(&mut self, host: &str, instance: &zonegrid_state::InstanceProperties) -> bool {
        match self.hosts.iter_mut().find(|h| h.host == host) {
            Some(state) => {
                state.consume_from_instance(instance);
                true
            }
            None => false,
        }
    }

    /// Pick up to `count` hosts, consuming resources after each pick.
    ///
    /// Stops early once no host survives filtering. The same host may be
    /// picked more than once. Each returned host carries its snapshot as
    /// it was when weighed.
    pub fn select(
        &mut self,
        chain: &FilterChain,
        cost_fns: &[CostFunctionEntry],
        props: &FilterProperties,
        count: usize,
    ) -> Vec<WeightedHost> {
        let mut selected = Vec::with_capacity(count);

        for iteration in 0..count {
            self.retain_passing(chain, props);
            let Some(winner) = weighted_sum(cost_fns, &self.hosts, props) else {
                debug!(iteration, "no hosts left after filtering");
                break;
            };

            if let Some(name) = winner.host_name() {
                self.consume(name, &props.request_spec.instance_properties);
            }
            debug!(iteration, host = ?winner.host_name(), weight = winner.weight, "host selected");
            selected.push(winner);
        }

        info!(requested = count, selected = selected.len(), "local selection finished");
        selected
    }
}
