//! zonegrid federation: talking to child zones.
//!
//! A parent zone never sees its children's hosts. Children answer
//! `select` with weights and encrypted build plans; the parent rescales
//! the weights into its own cost space, merges them with local
//! candidates, and later hands a winning plan back to the child.
//!
//! # Components
//!
//! - **`blob`**: Authenticated build-plan codec
//! - **`client`**: Child-zone client contract (authenticate, select, create, info)
//! - **`fanout`**: Concurrent `select` fan-out and weight rescaling
//! - **`delegate`**: Forwarding an instance create to a child zone
//! - **`scrub`**: Public, encrypted view of a `select` result
//! - **`zone_manager`**: Periodic child-zone poller

pub mod blob;
pub mod client;
pub mod delegate;
pub mod error;
pub mod fanout;
pub mod scrub;
pub mod zone_manager;

pub use blob::BuildPlanCodec;
pub use client::{CreateServerRequest, ZoneClient, ZoneCredentials, ZoneFuture, ZoneSession};
pub use delegate::ask_child_zone_to_create_instance;
pub use error::{BlobError, ZoneClientError};
pub use fanout::{ZoneSelectResult, adjust_child_weights, call_zone_select};
pub use scrub::{ScrubbedPlan, scrub_build_plan, scrub_zone};
pub use zone_manager::{ZoneInfo, ZoneManager, ZoneState};
