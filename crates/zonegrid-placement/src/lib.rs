//! zonegrid placement: host filtering and least-cost weighing.
//!
//! This crate picks local hosts for a request. It does NOT talk to child
//! zones (that's `zonegrid-federation`) or provision anything (that's
//! `zonegrid-scheduler`). Given fresh host states it filters, weighs and
//! virtually consumes resources, one instance at a time.
//!
//! # Components
//!
//! - **`host_state`**: Host snapshots and the in-memory host manager
//! - **`filters`**: Host filter capability and the configured filter chain
//! - **`properties`**: Per-request filter properties
//! - **`cost`**: Cost functions and the per-topic cost-function registry
//! - **`weighing`**: Weighted hosts and the weighted-sum algorithm
//! - **`placer`**: The per-pass working set and select loop

pub mod cost;
pub mod error;
pub mod filters;
pub mod host_state;
pub mod placer;
pub mod properties;
pub mod weighing;

pub use cost::{CostFn, CostFunctionEntry, CostFunctionRegistry};
pub use error::PlacementError;
pub use filters::{FilterChain, HostFilter, PassThroughFilter};
pub use host_state::{CapabilityReport, HostManager, HostState, HostStateSource};
pub use placer::HostWorkingSet;
pub use properties::FilterProperties;
pub use weighing::{WeightedHost, WeightedHostRecord, sort_by_weight, weighted_sum};
