//! Domain types for the zonegrid state store.
//!
//! These types describe child zones, instance types (flavors), and the
//! instance records the scheduler creates when it provisions locally.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a child zone.
pub type ZoneId = String;

/// Unique identifier for an instance type.
pub type InstanceTypeId = u64;

/// Unique identifier for an instance.
pub type InstanceUuid = String;

// ── Zone ──────────────────────────────────────────────────────────

/// A federated child zone reachable through its API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Added to every weight the zone reports. Missing values make the
    /// zone's `select` results unusable.
    #[serde(default)]
    pub weight_offset: Option<f64>,
    /// Multiplies every weight the zone reports.
    #[serde(default)]
    pub weight_scale: Option<f64>,
}

/// A zone with its credentials stripped, safe to hand to API callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneView {
    pub id: ZoneId,
    pub name: String,
    pub api_url: String,
    pub weight_offset: Option<f64>,
    pub weight_scale: Option<f64>,
}

impl Zone {
    /// Drop credentials before exposing the zone.
    pub fn scrubbed(&self) -> ZoneView {
        ZoneView {
            id: self.id.clone(),
            name: self.name.clone(),
            api_url: self.api_url.clone(),
            weight_offset: self.weight_offset,
            weight_scale: self.weight_scale,
        }
    }
}

// ── Instance type ─────────────────────────────────────────────────

/// Flavor describing the resources an instance consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceType {
    pub id: InstanceTypeId,
    pub name: String,
    /// Public flavor identifier used by the zone API.
    pub flavorid: String,
    pub memory_mb: u64,
    pub vcpus: u32,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
    /// Capabilities a host must advertise to run this flavor.
    #[serde(default)]
    pub extra_specs: HashMap<String, String>,
}

// ── Request ───────────────────────────────────────────────────────

/// Properties of the instance being requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceProperties {
    /// Placeholder identity. Cleared after the first local provisioning
    /// of a multi-instance request so storage assigns fresh ones.
    #[serde(default)]
    pub uuid: Option<InstanceUuid>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub reservation_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub instance_type_id: Option<InstanceTypeId>,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub root_gb: u64,
    #[serde(default)]
    pub ephemeral_gb: u64,
}

/// A placement request for one or more identical instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSpec {
    pub instance_properties: InstanceProperties,
    #[serde(default)]
    pub instance_type: Option<InstanceType>,
    #[serde(default = "default_num_instances")]
    pub num_instances: u32,
    /// Encrypted single-candidate build plan produced by an earlier `select`.
    #[serde(default)]
    pub blob: Option<String>,
}

fn default_num_instances() -> u32 {
    1
}

impl RequestSpec {
    pub fn new(instance_properties: InstanceProperties, instance_type: InstanceType) -> Self {
        Self {
            instance_properties,
            instance_type: Some(instance_type),
            num_instances: 1,
            blob: None,
        }
    }

    /// Number of instances requested; never less than one.
    pub fn requested_count(&self) -> usize {
        self.num_instances.max(1) as usize
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle state of an instance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Building,
    Active,
    Resizing,
    Error,
}

/// Persisted record of an instance created by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub uuid: InstanceUuid,
    pub display_name: String,
    pub image_ref: String,
    pub metadata: HashMap<String, String>,
    pub reservation_id: String,
    pub project_id: String,
    pub user_id: String,
    pub instance_type_id: Option<InstanceTypeId>,
    pub memory_mb: u64,
    pub vcpus: u32,
    pub root_gb: u64,
    pub ephemeral_gb: u64,
    /// Compute host the instance was dispatched to, once known.
    pub host: Option<String>,
    pub vm_state: VmState,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

/// Partial update applied by `StateStore::instance_update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceUpdate {
    pub vm_state: Option<VmState>,
    pub host: Option<String>,
}

impl InstanceRecord {
    /// Build a fresh record from request properties.
    pub fn from_properties(uuid: InstanceUuid, props: &InstanceProperties, now: u64) -> Self {
        Self {
            uuid,
            display_name: props.display_name.clone(),
            image_ref: props.image_ref.clone(),
            metadata: props.metadata.clone(),
            reservation_id: props.reservation_id.clone(),
            project_id: props.project_id.clone(),
            user_id: props.user_id.clone(),
            instance_type_id: props.instance_type_id,
            memory_mb: props.memory_mb,
            vcpus: props.vcpus,
            root_gb: props.root_gb,
            ephemeral_gb: props.ephemeral_gb,
            host: None,
            vm_state: VmState::Building,
            created_at: now,
            updated_at: now,
        }
    }
}
