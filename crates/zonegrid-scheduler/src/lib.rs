//! zonegrid-scheduler: distributed instance scheduling.
//!
//! Drives one scheduling pass from request to placement:
//!
//! - Filters and weighs local hosts, consuming resources per instance
//! - Fans `select` out to child zones and merges their rescaled weights
//! - Provisions winners locally or delegates them to the owning zone
//! - Picks resize targets
//!
//! # Architecture
//!
//! ```text
//! SchedulerManager
//!   ├── HostManager (capability reports → host snapshots)
//!   ├── ZoneManager (child-zone polling)
//!   └── DistributedScheduler
//!       ├── FilterChain + CostFunctionRegistry (local selection)
//!       ├── ZoneClient (child-zone select / create)
//!       ├── StateStore (zones, instance types, instance records)
//!       └── ComputeDispatch (fire-and-forget casts to compute hosts)
//! ```

pub mod dispatch;
pub mod error;
pub mod manager;
pub mod scheduler;

pub use dispatch::{ChannelDispatch, ComputeCast, ComputeCommand, ComputeDispatch};
pub use error::{SchedulerError, SchedulerResult};
pub use manager::SchedulerManager;
pub use scheduler::{DistributedScheduler, PopulateFilterProperties, ScheduledInstance};
