//! Forwarding an instance create to a child zone.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use zonegrid_core::RequestContext;
use zonegrid_state::{InstanceType, RequestSpec, Zone};

use crate::client::{CreateServerRequest, ZoneClient, ZoneCredentials};
use crate::error::ZoneClientError;

/// Ask `zone` to create one instance from `spec`, handing over the
/// zone's own build plan so it can skip scheduling.
///
/// Authenticates with the caller's token, never the zone admin's. An
/// authentication failure is returned as is and not retried. The
/// authenticate and create pair shares one `timeout`; running past it is
/// a transport error.
pub async fn ask_child_zone_to_create_instance(
    client: &dyn ZoneClient,
    ctx: &RequestContext,
    zone: &Zone,
    spec: &RequestSpec,
    instance_type: &InstanceType,
    child_blob: Option<String>,
    injected_files: Vec<(String, String)>,
    timeout: Duration,
) -> Result<Value, ZoneClientError> {
    let request = CreateServerRequest::from_request_spec(spec, instance_type, child_blob, injected_files);
    info!(
        zone = %zone.name,
        reservation_id = %request.reservation_id,
        "forwarding instance create to child zone"
    );

    let credentials = ZoneCredentials::for_caller(ctx, zone);
    let create = async {
        let session = client.authenticate(&zone.api_url, &credentials).await?;
        session.create_server(&request).await
    };
    match tokio::time::timeout(timeout, create).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(zone = %zone.name, url = %zone.api_url, ?timeout, "child zone create timed out");
            Err(ZoneClientError::Transport(format!(
                "timed out after {timeout:?} creating instance in zone {}",
                zone.name
            )))
        }
    }
}
