//! redb table definitions for the zonegrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Child zones keyed by `{zone_id}`.
pub const ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("zones");

/// Instance types keyed by `{instance_type_id}`.
pub const INSTANCE_TYPES: TableDefinition<&str, &[u8]> = TableDefinition::new("instance_types");

/// Instance records keyed by `{uuid}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
