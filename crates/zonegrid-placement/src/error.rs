//! Placement configuration errors.

use thiserror::Error;

/// Misconfiguration discovered while resolving filters or cost functions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("scheduler cost function not found: {0}")]
    CostFunctionNotFound(String),

    #[error("scheduler weight flag not found: {0}")]
    WeightFlagNotFound(String),

    #[error("host filter not found: {0}")]
    FilterNotFound(String),
}
