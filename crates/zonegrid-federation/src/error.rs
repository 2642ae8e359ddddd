//! Federation error types.

use thiserror::Error;

/// Failures decoding or encoding a build-plan blob.
///
/// None of these are recovered locally: a plan that does not decode must
/// fail the request, never turn into "no host".
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("build plan is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("build plan is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported build plan version {0}")]
    UnsupportedVersion(u8),

    #[error("build plan failed authentication")]
    Decrypt,

    #[error("build plan encryption failed")]
    Encrypt,

    #[error("invalid build plan key")]
    InvalidKey,

    #[error("build plan is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("build plan names neither a host nor a zone")]
    EmptyPlan,
}

/// Failures talking to a child zone.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZoneClientError {
    #[error("zone {url} rejected credentials")]
    Unauthorized { url: String },

    #[error("transport error talking to zone: {0}")]
    Transport(String),

    #[error("bad response from zone: {0}")]
    BadResponse(String),
}
