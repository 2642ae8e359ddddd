//! Child-zone client contract.
//!
//! The wire transport lives outside this crate. Implementations are
//! injected so the scheduler can be tested without a network.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use zonegrid_core::RequestContext;
use zonegrid_state::{InstanceType, RequestSpec, Zone};

use crate::error::ZoneClientError;

/// Boxed future returned by zone client calls.
pub type ZoneFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ZoneClientError>> + Send + 'a>>;

/// Credentials used to authenticate against a child zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCredentials {
    pub username: String,
    pub password: String,
    /// Token of the caller, when acting on their behalf.
    pub auth_token: Option<String>,
    /// Region name the zone is registered under.
    pub region_name: String,
}

impl ZoneCredentials {
    /// The zone's own admin credentials, for polling and `select`.
    pub fn zone_admin(zone: &Zone) -> Self {
        Self {
            username: zone.username.clone(),
            password: zone.password.clone(),
            auth_token: None,
            region_name: zone.name.clone(),
        }
    }

    /// Act as the caller: the caller's token decides what is allowed.
    pub fn for_caller(ctx: &RequestContext, zone: &Zone) -> Self {
        Self {
            auth_token: ctx.auth_token.clone(),
            ..Self::zone_admin(zone)
        }
    }
}

/// A single-instance create call forwarded to a child zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub image_ref: String,
    pub flavor_id: String,
    pub metadata: HashMap<String, String>,
    /// `(path, contents)` pairs injected into the instance.
    pub files: Vec<(String, String)>,
    /// Child's own build plan, so it can skip scheduling.
    pub zone_blob: Option<String>,
    pub reservation_id: String,
}

impl CreateServerRequest {
    /// Rebuild the API call from a request spec.
    pub fn from_request_spec(
        spec: &RequestSpec,
        instance_type: &InstanceType,
        zone_blob: Option<String>,
        files: Vec<(String, String)>,
    ) -> Self {
        let props = &spec.instance_properties;
        Self {
            name: props.display_name.clone(),
            image_ref: props.image_ref.clone(),
            flavor_id: instance_type.flavorid.clone(),
            metadata: props.metadata.clone(),
            files,
            zone_blob,
            reservation_id: props.reservation_id.clone(),
        }
    }
}

/// Connects to child zones.
pub trait ZoneClient: Send + Sync {
    /// Authenticate against the zone API at `api_url`.
    ///
    /// Rejected credentials must surface as [`ZoneClientError::Unauthorized`].
    fn authenticate<'a>(
        &'a self,
        api_url: &'a str,
        credentials: &'a ZoneCredentials,
    ) -> ZoneFuture<'a, Box<dyn ZoneSession>>;
}

/// An authenticated connection to one child zone.
pub trait ZoneSession: Send + Sync {
    /// Create one server; returns the zone's description of it.
    fn create_server<'a>(&'a self, request: &'a CreateServerRequest) -> ZoneFuture<'a, Value>;

    /// Ask the zone to rank candidates for a serialized request spec.
    /// Entries are untrusted and expected to look like `{weight, blob}`.
    fn select<'a>(&'a self, specs: &'a str) -> ZoneFuture<'a, Vec<Value>>;

    /// Zone metadata and capabilities.
    fn info(&self) -> ZoneFuture<'_, Map<String, Value>>;
}
