//! Free-form scheduler options read from a JSON file.
//!
//! The file is re-read only when its modification time changes. A file
//! that cannot be read or parsed leaves the last good options in place.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Cached {
    last_modified: Option<SystemTime>,
    data: Map<String, Value>,
}

/// Hot-reloaded JSON options, threaded into filter properties.
#[derive(Debug, Default)]
pub struct SchedulerOptions {
    path: Option<PathBuf>,
    cached: Mutex<Cached>,
}

impl SchedulerOptions {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            cached: Mutex::new(Cached::default()),
        }
    }

    /// Current options; an empty map when no file is configured.
    pub fn get_configuration(&self) -> Map<String, Value> {
        let Some(path) = self.path.as_deref() else {
            return Map::new();
        };

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not stat scheduler options");
                return cached.data.clone();
            }
        };

        if cached.last_modified == Some(modified) {
            return cached.data.clone();
        }

        match load(path) {
            Ok(data) => {
                debug!(path = %path.display(), keys = data.len(), "scheduler options reloaded");
                cached.data = data;
                cached.last_modified = Some(modified);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not load scheduler options");
            }
        }
        cached.data.clone()
    }
}

fn load(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, found {other}"),
    }
}
