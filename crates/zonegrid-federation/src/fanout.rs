//! Child-zone `select` fan-out and weight rescaling.
//!
//! Every zone is asked concurrently, each call under its own timeout. A
//! zone that fails, times out or answers garbage contributes nothing;
//! it never fails the pass or its siblings.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use zonegrid_placement::WeightedHost;
use zonegrid_state::{Zone, ZoneId};

use crate::client::{ZoneClient, ZoneCredentials};
use crate::error::ZoneClientError;

/// Raw `select` answer from one child zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSelectResult {
    pub zone_id: ZoneId,
    pub entries: Vec<Value>,
}

async fn select_one(
    client: &dyn ZoneClient,
    zone: &Zone,
    specs: &str,
) -> Result<Vec<Value>, ZoneClientError> {
    let credentials = ZoneCredentials::zone_admin(zone);
    let session = client.authenticate(&zone.api_url, &credentials).await?;
    session.select(specs).await
}

/// Call `select` on every zone concurrently.
///
/// Results come back in the order of `zones`. Zones whose call failed or
/// timed out are logged and left out.
pub async fn call_zone_select(
    client: Arc<dyn ZoneClient>,
    zones: &[Zone],
    specs: &str,
    timeout: Duration,
) -> Vec<ZoneSelectResult> {
    let mut calls = JoinSet::new();
    for (idx, zone) in zones.iter().cloned().enumerate() {
        let client = Arc::clone(&client);
        let specs = specs.to_string();
        calls.spawn(async move {
            let outcome = tokio::time::timeout(timeout, select_one(client.as_ref(), &zone, &specs)).await;
            (idx, zone, outcome)
        });
    }

    let mut answered = Vec::with_capacity(zones.len());
    while let Some(joined) = calls.join_next().await {
        let (idx, zone, outcome) = match joined {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "zone select task failed");
                continue;
            }
        };
        match outcome {
            Ok(Ok(entries)) => {
                debug!(zone = %zone.id, entries = entries.len(), "zone answered select");
                answered.push((
                    idx,
                    ZoneSelectResult {
                        zone_id: zone.id,
                        entries,
                    },
                ));
            }
            Ok(Err(e)) => {
                warn!(zone = %zone.id, url = %zone.api_url, error = %e, "zone select failed");
            }
            Err(_) => {
                warn!(zone = %zone.id, url = %zone.api_url, ?timeout, "zone select timed out");
            }
        }
    }

    answered.sort_by_key(|(idx, _)| *idx);
    answered.into_iter().map(|(_, r)| r).collect()
}

/// Map child weights into local cost space: `offset + scale × raw`.
///
/// A zone without offset or scale is skipped, as is any entry without a
/// finite numeric weight or a blob.
pub fn adjust_child_weights(results: &[ZoneSelectResult], zones: &[Zone]) -> Vec<WeightedHost> {
    let mut weighted = Vec::new();

    for result in results {
        let Some(zone) = zones.iter().find(|z| z.id == result.zone_id) else {
            warn!(zone = %result.zone_id, "select result from unknown zone");
            continue;
        };
        let (Some(offset), Some(scale)) = (zone.weight_offset, zone.weight_scale) else {
            warn!(zone = %zone.id, "bad child zone scaling values");
            continue;
        };

        for entry in &result.entries {
            let raw = entry.get("weight").and_then(Value::as_f64);
            let blob = entry.get("blob").and_then(Value::as_str);
            let (Some(raw), Some(blob)) = (raw, blob) else {
                warn!(zone = %zone.id, "child zone entry missing weight or blob");
                continue;
            };

            let cooked = offset + scale * raw;
            if !cooked.is_finite() {
                warn!(zone = %zone.id, raw, "child zone weight is not finite");
                continue;
            }
            weighted.push(WeightedHost::remote(cooked, zone.id.clone(), blob.to_string()));
        }
    }

    weighted
}
