//! zonegrid-state: storage collaborator for the zonegrid scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for child zones, instance types, and instance records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by their identifier. The scheduler only reads zones and instance
//! types and creates/updates instance records; everything else about the
//! lifecycle of those rows belongs to other services.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
