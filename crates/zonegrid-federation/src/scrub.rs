//! Public views that hide internal zone layout.

use serde::{Deserialize, Serialize};

use zonegrid_placement::WeightedHost;
use zonegrid_state::{Zone, ZoneView};

use crate::blob::BuildPlanCodec;
use crate::error::BlobError;

/// A `select` entry as a parent zone sees it: a weight and a sealed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrubbedPlan {
    pub weight: f64,
    pub blob: String,
}

/// Seal every entry so only its weight stays readable.
pub fn scrub_build_plan(
    entries: &[WeightedHost],
    codec: &BuildPlanCodec,
) -> Result<Vec<ScrubbedPlan>, BlobError> {
    entries
        .iter()
        .map(|entry| {
            Ok(ScrubbedPlan {
                weight: entry.weight,
                blob: codec.encode(entry)?,
            })
        })
        .collect()
}

/// A zone without its credentials.
pub fn scrub_zone(zone: &Zone) -> ZoneView {
    zone.scrubbed()
}
