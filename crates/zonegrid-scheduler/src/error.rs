//! Scheduler error types.

use thiserror::Error;

use zonegrid_federation::{BlobError, ZoneClientError};
use zonegrid_placement::PlacementError;
use zonegrid_state::StateError;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no valid host was found: {0}")]
    NoValidHost(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("build plan encryption key is not set")]
    EncryptionKeyNotSet,

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error("build plan error: {0}")]
    BuildPlan(#[from] BlobError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("child zone error: {0}")]
    Zone(ZoneClientError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<ZoneClientError> for SchedulerError {
    fn from(e: ZoneClientError) -> Self {
        match e {
            ZoneClientError::Unauthorized { url } => SchedulerError::NotAuthorized(format!(
                "bad credentials attempting to talk to zone at {url}"
            )),
            other => SchedulerError::Zone(other),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
