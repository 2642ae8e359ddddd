//! Child-zone poller.
//!
//! Keeps one [`ZoneState`] per registered child zone. The zone set is
//! re-read from storage at most once per check interval; every update
//! then polls each zone's `info` concurrently. Consecutive failures take
//! a zone offline, a single success brings it back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use zonegrid_core::SchedulerConfig;
use zonegrid_state::{StateResult, StateStore, Zone, ZoneId};

use crate::client::{ZoneClient, ZoneCredentials};
use crate::error::ZoneClientError;

/// What the poller knows about one child zone.
#[derive(Debug, Clone)]
pub struct ZoneState {
    pub zone: Zone,
    pub is_active: bool,
    /// Latest `info` answer, minus the zone's name.
    pub capabilities: Map<String, Value>,
    /// Consecutive failed polls.
    pub attempt: u32,
    pub last_seen: Option<SystemTime>,
    pub last_error: Option<String>,
    pub last_error_at: Option<SystemTime>,
}

/// Public summary of a zone, as returned by `get_zone_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub id: ZoneId,
    pub api_url: String,
    pub weight_offset: Option<f64>,
    pub weight_scale: Option<f64>,
    pub is_active: bool,
    pub capabilities: Map<String, Value>,
}

impl ZoneState {
    fn new(zone: Zone) -> Self {
        Self {
            zone,
            is_active: true,
            capabilities: Map::new(),
            attempt: 0,
            last_seen: None,
            last_error: None,
            last_error_at: None,
        }
    }

    fn update_metadata(&mut self, mut metadata: Map<String, Value>) {
        metadata.remove("name");
        self.capabilities = metadata;
        self.last_seen = Some(SystemTime::now());
        self.attempt = 0;
        self.is_active = true;
    }

    fn log_error(&mut self, error: String, failures_to_offline: u32) {
        warn!(zone = %self.zone.id, url = %self.zone.api_url, %error, "error talking to zone");
        self.last_error = Some(error);
        self.last_error_at = Some(SystemTime::now());
        self.attempt += 1;
        if self.attempt >= failures_to_offline && self.is_active {
            self.is_active = false;
            error!(
                zone = %self.zone.id,
                url = %self.zone.api_url,
                attempts = self.attempt,
                "no answer from zone, marking inactive"
            );
        }
    }

    pub fn zone_info(&self) -> ZoneInfo {
        ZoneInfo {
            id: self.zone.id.clone(),
            api_url: self.zone.api_url.clone(),
            weight_offset: self.zone.weight_offset,
            weight_scale: self.zone.weight_scale,
            is_active: self.is_active,
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Tracks the health and capabilities of every child zone.
#[derive(Debug)]
pub struct ZoneManager {
    states: BTreeMap<ZoneId, ZoneState>,
    last_db_check: Option<Instant>,
    db_check_interval: Duration,
    failures_to_offline: u32,
    call_timeout: Duration,
}

impl ZoneManager {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            states: BTreeMap::new(),
            last_db_check: None,
            db_check_interval: config.db_check_interval(),
            failures_to_offline: config.zones.failures_to_offline.max(1),
            call_timeout: config.zone_call_timeout(),
        }
    }

    pub fn get_zone_list(&self) -> Vec<ZoneInfo> {
        self.states.values().map(ZoneState::zone_info).collect()
    }

    pub fn zone_state(&self, zone_id: &str) -> Option<&ZoneState> {
        self.states.get(zone_id)
    }

    /// Make the tracked zone set match storage.
    pub fn refresh_from_db(&mut self, store: &StateStore) -> StateResult<()> {
        let zones = store.zone_get_all()?;

        self.states
            .retain(|id, _| zones.iter().any(|z| &z.id == id));
        for zone in zones {
            match self.states.get_mut(&zone.id) {
                Some(state) => state.zone = zone,
                None => {
                    debug!(zone = %zone.id, "tracking new zone");
                    self.states.insert(zone.id.clone(), ZoneState::new(zone));
                }
            }
        }
        Ok(())
    }

    /// Refresh from storage if the check interval elapsed, then poll
    /// every zone.
    pub async fn update(
        &mut self,
        store: &StateStore,
        client: Arc<dyn ZoneClient>,
    ) -> StateResult<()> {
        let due = self
            .last_db_check
            .is_none_or(|at| at.elapsed() >= self.db_check_interval);
        if due {
            debug!("updating zone cache from storage");
            self.last_db_check = Some(Instant::now());
            self.refresh_from_db(store)?;
        }
        self.poll_zones(client).await;
        Ok(())
    }

    async fn poll_zones(&mut self, client: Arc<dyn ZoneClient>) {
        let mut polls = JoinSet::new();
        for state in self.states.values() {
            let client = Arc::clone(&client);
            let zone = state.zone.clone();
            let timeout = self.call_timeout;
            polls.spawn(async move {
                debug!(zone = %zone.name, url = %zone.api_url, "polling zone");
                let outcome = tokio::time::timeout(timeout, poll_one(client.as_ref(), &zone))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ZoneClientError::Transport(format!("timed out after {timeout:?}")))
                    });
                (zone.id, outcome)
            });
        }

        while let Some(joined) = polls.join_next().await {
            let (zone_id, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "zone poll task failed");
                    continue;
                }
            };
            let Some(state) = self.states.get_mut(&zone_id) else {
                continue;
            };
            match outcome {
                Ok(metadata) => state.update_metadata(metadata),
                Err(e) => state.log_error(e.to_string(), self.failures_to_offline),
            }
        }
    }
}

async fn poll_one(client: &dyn ZoneClient, zone: &Zone) -> Result<Map<String, Value>, ZoneClientError> {
    let credentials = ZoneCredentials::zone_admin(zone);
    let session = client.authenticate(&zone.api_url, &credentials).await?;
    session.info().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::client::{CreateServerRequest, ZoneFuture, ZoneSession};

    /// Zones whose URL is in `down` fail to authenticate.
    #[derive(Default)]
    struct FlakyClient {
        down: Mutex<HashSet<String>>,
    }

    impl FlakyClient {
        fn set_down(&self, url: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(url.to_string());
            } else {
                set.remove(url);
            }
        }
    }

    struct InfoSession(String);

    impl ZoneSession for InfoSession {
        fn create_server<'a>(&'a self, _request: &'a CreateServerRequest) -> ZoneFuture<'a, Value> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn select<'a>(&'a self, _specs: &'a str) -> ZoneFuture<'a, Vec<Value>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn info(&self) -> ZoneFuture<'_, Map<String, Value>> {
            let url = self.0.clone();
            Box::pin(async move {
                let info = json!({"name": "child", "url": url, "hypervisor": "kvm"});
                Ok(info.as_object().cloned().unwrap_or_default())
            })
        }
    }

    impl ZoneClient for FlakyClient {
        fn authenticate<'a>(
            &'a self,
            api_url: &'a str,
            _credentials: &'a ZoneCredentials,
        ) -> ZoneFuture<'a, Box<dyn ZoneSession>> {
            let down = self.down.lock().unwrap().contains(api_url);
            Box::pin(async move {
                if down {
                    Err(ZoneClientError::Transport("connection refused".to_string()))
                } else {
                    Ok(Box::new(InfoSession(api_url.to_string())) as Box<dyn ZoneSession>)
                }
            })
        }
    }

    fn zone(id: &str) -> Zone {
        Zone {
            id: id.to_string(),
            name: id.to_string(),
            api_url: format!("http://{id}"),
            username: "admin".to_string(),
            password: "pw".to_string(),
            weight_offset: Some(0.0),
            weight_scale: Some(1.0),
        }
    }

    fn config(failures: u32, interval_secs: u64) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.zones.failures_to_offline = failures;
        config.zones.db_check_interval_secs = interval_secs;
        config
    }

    #[tokio::test]
    async fn successful_poll_records_capabilities() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&zone("z1")).unwrap();
        let client = Arc::new(FlakyClient::default());
        let mut manager = ZoneManager::new(&config(3, 60));

        manager.update(&store, client).await.unwrap();

        let list = manager.get_zone_list();
        assert_eq!(list.len(), 1);
        assert!(list[0].is_active);
        assert_eq!(list[0].capabilities["hypervisor"], "kvm");
        assert!(!list[0].capabilities.contains_key("name"));
        assert!(manager.zone_state("z1").unwrap().last_seen.is_some());
    }

    #[tokio::test]
    async fn repeated_failures_take_zone_offline_and_success_recovers() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&zone("z1")).unwrap();
        let client = Arc::new(FlakyClient::default());
        client.set_down("http://z1", true);
        let mut manager = ZoneManager::new(&config(2, 60));

        manager.update(&store, client.clone()).await.unwrap();
        let state = manager.zone_state("z1").unwrap();
        assert!(state.is_active);
        assert_eq!(state.attempt, 1);
        assert!(state.last_error.is_some());

        manager.update(&store, client.clone()).await.unwrap();
        assert!(!manager.zone_state("z1").unwrap().is_active);

        client.set_down("http://z1", false);
        manager.update(&store, client).await.unwrap();
        let state = manager.zone_state("z1").unwrap();
        assert!(state.is_active);
        assert_eq!(state.attempt, 0);
    }

    #[tokio::test]
    async fn storage_is_reread_only_when_interval_elapses() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&zone("z1")).unwrap();
        let client = Arc::new(FlakyClient::default());
        let mut manager = ZoneManager::new(&config(3, 3600));

        manager.update(&store, client.clone()).await.unwrap();
        store.put_zone(&zone("z2")).unwrap();
        manager.update(&store, client).await.unwrap();

        assert_eq!(manager.get_zone_list().len(), 1);
    }

    #[tokio::test]
    async fn refresh_adds_updates_and_drops_zones() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&zone("z1")).unwrap();
        store.put_zone(&zone("z2")).unwrap();
        let client: Arc<dyn ZoneClient> = Arc::new(FlakyClient::default());
        let mut manager = ZoneManager::new(&config(3, 0));

        manager.update(&store, Arc::clone(&client)).await.unwrap();
        assert_eq!(manager.get_zone_list().len(), 2);

        store.delete_zone("z1").unwrap();
        let mut changed = zone("z2");
        changed.weight_scale = Some(4.0);
        store.put_zone(&changed).unwrap();
        store.put_zone(&zone("z3")).unwrap();
        manager.update(&store, client).await.unwrap();

        let ids: Vec<_> = manager.get_zone_list().into_iter().map(|z| z.id).collect();
        assert_eq!(ids, vec!["z2", "z3"]);
        assert_eq!(manager.zone_state("z2").unwrap().zone.weight_scale, Some(4.0));
    }
}
