//! StateStore: redb-backed storage for the zonegrid scheduler.
//!
//! Provides typed operations over zones, instance types, and instance
//! records. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ZONES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_TYPES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic row helpers ────────────────────────────────────────

    fn put_row<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_rows<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    fn delete_row(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Zones ──────────────────────────────────────────────────────

    /// Insert or update a child zone.
    pub fn put_zone(&self, zone: &Zone) -> StateResult<()> {
        self.put_row(ZONES, &zone.id, zone)?;
        debug!(zone = %zone.id, "zone stored");
        Ok(())
    }

    /// Get a zone by ID.
    pub fn zone_get(&self, zone_id: &str) -> StateResult<Zone> {
        self.get_row(ZONES, zone_id)?
            .ok_or_else(|| StateError::NotFound(format!("zone {zone_id}")))
    }

    /// List all child zones.
    pub fn zone_get_all(&self) -> StateResult<Vec<Zone>> {
        self.list_rows(ZONES)
    }

    /// Delete a zone by ID. Returns true if it existed.
    pub fn delete_zone(&self, zone_id: &str) -> StateResult<bool> {
        let existed = self.delete_row(ZONES, zone_id)?;
        debug!(zone = %zone_id, existed, "zone deleted");
        Ok(existed)
    }

    // ── Instance types ─────────────────────────────────────────────

    /// Insert or update an instance type.
    pub fn put_instance_type(&self, instance_type: &InstanceType) -> StateResult<()> {
        self.put_row(INSTANCE_TYPES, &instance_type.id.to_string(), instance_type)
    }

    /// Get an instance type by ID.
    pub fn instance_type_get(&self, id: InstanceTypeId) -> StateResult<InstanceType> {
        self.get_row(INSTANCE_TYPES, &id.to_string())?
            .ok_or_else(|| StateError::NotFound(format!("instance type {id}")))
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Create an instance record from request properties.
    ///
    /// Uses the placeholder uuid from `props` when present, otherwise
    /// generates a fresh one. Creating a uuid that already exists fails
    /// with [`StateError::Duplicate`].
    pub fn instance_create(&self, props: &InstanceProperties) -> StateResult<InstanceRecord> {
        let uuid = props
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let record = InstanceRecord::from_properties(uuid, props, epoch_secs());
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            if table
                .get(record.uuid.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Duplicate(format!("instance {}", record.uuid)));
            }
            table
                .insert(record.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(uuid = %record.uuid, "instance record created");
        Ok(record)
    }

    /// Get an instance record by uuid.
    pub fn instance_get(&self, uuid: &str) -> StateResult<Option<InstanceRecord>> {
        self.get_row(INSTANCES, uuid)
    }

    /// List all instance records.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        self.list_rows(INSTANCES)
    }

    /// Apply a partial update to an instance record.
    pub fn instance_update(
        &self,
        uuid: &str,
        update: &InstanceUpdate,
    ) -> StateResult<InstanceRecord> {
        let mut record: InstanceRecord = self
            .get_row(INSTANCES, uuid)?
            .ok_or_else(|| StateError::NotFound(format!("instance {uuid}")))?;
        if let Some(vm_state) = update.vm_state {
            record.vm_state = vm_state;
        }
        if let Some(host) = &update.host {
            record.host = Some(host.clone());
        }
        record.updated_at = epoch_secs();
        self.put_row(INSTANCES, uuid, &record)?;
        debug!(%uuid, vm_state = ?record.vm_state, "instance record updated");
        Ok(record)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
