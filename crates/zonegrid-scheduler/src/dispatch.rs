//! Compute dispatch: fire-and-forget commands to compute hosts.
//!
//! The scheduler never waits for a compute host. It casts a command and
//! moves on; delivery is the transport's business.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use zonegrid_core::RequestContext;
use zonegrid_state::{InstanceTypeId, InstanceUuid};

/// A command for a compute host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ComputeCommand {
    RunInstance {
        instance_uuid: InstanceUuid,
        #[serde(default)]
        injected_files: Vec<(String, String)>,
    },
    PrepResize {
        instance_uuid: Option<InstanceUuid>,
        instance_type_id: InstanceTypeId,
    },
}

/// Delivers commands to compute hosts.
pub trait ComputeDispatch: Send + Sync {
    /// Send `command` to `host` without waiting for a result.
    fn cast_to_compute_host(&self, ctx: &RequestContext, host: &str, command: ComputeCommand);
}

/// A command addressed to one host, as queued by [`ChannelDispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeCast {
    pub host: String,
    pub request_id: Option<String>,
    pub command: ComputeCommand,
}

/// Queues casts on an unbounded channel for a transport task to drain.
#[derive(Debug, Clone)]
pub struct ChannelDispatch {
    tx: mpsc::UnboundedSender<ComputeCast>,
}

impl ChannelDispatch {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ComputeCast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ComputeDispatch for ChannelDispatch {
    fn cast_to_compute_host(&self, ctx: &RequestContext, host: &str, command: ComputeCommand) {
        debug!(%host, ?command, "casting to compute host");
        let cast = ComputeCast {
            host: host.to_string(),
            request_id: ctx.request_id.clone(),
            command,
        };
        if self.tx.send(cast).is_err() {
            warn!(%host, "compute dispatch channel closed, cast dropped");
        }
    }
}
