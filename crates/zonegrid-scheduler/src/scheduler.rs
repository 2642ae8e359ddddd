//! DistributedScheduler: creates instances locally or across zones.
//!
//! One scheduling pass:
//! 1. Resolve cost functions and build the request's filter properties
//! 2. Pick local hosts one instance at a time, consuming resources
//! 3. Unless local-only, ask every child zone and rescale its weights
//! 4. Sort everything ascending by weight and keep the requested count
//!
//! Callers then either return that list (`select`), provision it
//! (`schedule_run_instance`) or pick a resize target from it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use zonegrid_core::{RequestContext, SchedulerConfig, SchedulerOptions};
use zonegrid_federation::{
    BuildPlanCodec, ZoneClient, adjust_child_weights, ask_child_zone_to_create_instance,
    call_zone_select,
};
use zonegrid_placement::{
    CostFunctionRegistry, FilterChain, FilterProperties, HostStateSource, HostWorkingSet,
    WeightedHost, WeightedHostRecord, sort_by_weight,
};
use zonegrid_state::{InstanceRecord, InstanceTypeId, RequestSpec, StateStore, ZoneId};

use crate::dispatch::{ComputeCommand, ComputeDispatch};
use crate::error::{SchedulerError, SchedulerResult};

/// The only topic this scheduler places.
const COMPUTE_TOPIC: &str = "compute";

/// Hook for adding request-specific filter properties before filtering.
pub type PopulateFilterProperties = Box<dyn Fn(&RequestSpec, &mut FilterProperties) + Send + Sync>;

/// An instance created by `schedule_run_instance`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledInstance {
    /// Persisted here and cast to a local compute host.
    Local(InstanceRecord),
    /// Created by a child zone; `instance` is that zone's description.
    Remote { zone: ZoneId, instance: Value },
}

/// Scheduler that works from a single zone up to nested zone trees.
pub struct DistributedScheduler {
    config: SchedulerConfig,
    options: SchedulerOptions,
    cost_functions: CostFunctionRegistry,
    filters: FilterChain,
    host_states: Arc<dyn HostStateSource>,
    store: StateStore,
    zone_client: Arc<dyn ZoneClient>,
    dispatch: Arc<dyn ComputeDispatch>,
    codec: Option<BuildPlanCodec>,
    populate_filter_properties: Option<PopulateFilterProperties>,
}

impl DistributedScheduler {
    /// Build a scheduler from configuration and its collaborators.
    ///
    /// Fails if a configured filter is unknown or the build-plan key
    /// cannot be derived.
    pub fn new(
        config: SchedulerConfig,
        host_states: Arc<dyn HostStateSource>,
        store: StateStore,
        zone_client: Arc<dyn ZoneClient>,
        dispatch: Arc<dyn ComputeDispatch>,
    ) -> SchedulerResult<Self> {
        let filters = FilterChain::from_names(&config.scheduler.host_filters)?;
        let codec = config.encryption_key().map(BuildPlanCodec::new).transpose()?;
        let options = SchedulerOptions::new(config.scheduler.options_path.clone());
        info!(
            filters = ?filters.names(),
            cost_functions = ?config.scheduler.least_cost_functions,
            local_zone_only = config.scheduler.local_zone_only,
            build_plans = codec.is_some(),
            "distributed scheduler configured"
        );

        Ok(Self {
            config,
            options,
            cost_functions: CostFunctionRegistry::with_builtins(),
            filters,
            host_states,
            store,
            zone_client,
            dispatch,
            codec,
            populate_filter_properties: None,
        })
    }

    /// Replace the built-in cost-function registry.
    pub fn with_cost_functions(mut self, registry: CostFunctionRegistry) -> Self {
        self.cost_functions = registry;
        self
    }

    pub fn with_populate_filter_properties(mut self, hook: PopulateFilterProperties) -> Self {
        self.populate_filter_properties = Some(hook);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cost_function_registry(&self) -> &CostFunctionRegistry {
        &self.cost_functions
    }

    pub fn build_plan_codec(&self) -> Option<&BuildPlanCodec> {
        self.codec.as_ref()
    }

    /// Generic topic dispatch. This scheduler only places compute
    /// instances, so there is never a host.
    pub fn schedule(&self, _ctx: &RequestContext, topic: &str, method: &str) -> SchedulerResult<()> {
        debug!(%topic, %method, "generic schedule requested");
        Err(SchedulerError::NoValidHost(format!(
            "no host selection for {topic} defined"
        )))
    }

    /// Ranked candidates for a request, without committing to any.
    pub async fn select(
        &self,
        ctx: &RequestContext,
        spec: &RequestSpec,
    ) -> SchedulerResult<Vec<WeightedHostRecord>> {
        let hosts = self.schedule_hosts(ctx, COMPUTE_TOPIC, spec).await?;
        Ok(hosts.iter().map(WeightedHost::to_record).collect())
    }

    /// Place and create every requested instance.
    ///
    /// A request carrying a build plan skips scheduling and uses the plan
    /// as its only candidate. Local winners get an instance record and a
    /// `run_instance` cast; remote winners are created by their zone.
    pub async fn schedule_run_instance(
        &self,
        ctx: &RequestContext,
        spec: &mut RequestSpec,
        injected_files: Vec<(String, String)>,
    ) -> SchedulerResult<Vec<ScheduledInstance>> {
        let elevated = ctx.elevated();
        let count = spec.requested_count();
        debug!(num_instances = count, "attempting to build instances");

        let weighted_hosts = match spec.blob.as_deref() {
            Some(blob) => {
                let codec = self.codec.as_ref().ok_or(SchedulerError::EncryptionKeyNotSet)?;
                vec![codec.decode(blob)?]
            }
            None => self.schedule_hosts(ctx, COMPUTE_TOPIC, spec).await?,
        };
        if weighted_hosts.is_empty() {
            return Err(SchedulerError::NoValidHost(
                "no weighted hosts available".to_string(),
            ));
        }

        let mut instances = Vec::with_capacity(count);
        for weighted_host in weighted_hosts.into_iter().take(count) {
            let instance = match weighted_host.zone.clone() {
                Some(zone_id) => {
                    self.delegate_to_child_zone(
                        &elevated,
                        &zone_id,
                        weighted_host,
                        spec,
                        injected_files.clone(),
                    )
                    .await?
                }
                None => self.provision_resource_locally(
                    &elevated,
                    &weighted_host,
                    spec,
                    injected_files.clone(),
                )?,
            };
            instances.push(instance);
        }

        Ok(instances)
    }

    /// Pick a local resize target for the instance in `spec` and cast
    /// `prep_resize` to it. Returns the chosen host.
    pub async fn schedule_prep_resize(
        &self,
        ctx: &RequestContext,
        spec: &RequestSpec,
        instance_type_id: InstanceTypeId,
    ) -> SchedulerResult<String> {
        let elevated = ctx.elevated();
        debug!(instance_type_id, "determining target host for resize");
        let instance_type = self.store.instance_type_get(instance_type_id)?;

        let mut resize_spec = spec.clone();
        resize_spec.instance_type = Some(instance_type);
        resize_spec.num_instances = 1;

        // Remote resize targets are not supported.
        let hosts = self
            .schedule_pass(ctx, COMPUTE_TOPIC, &resize_spec, true)
            .await?;
        let host = hosts
            .first()
            .and_then(WeightedHost::host_name)
            .ok_or_else(|| SchedulerError::NoValidHost("no resize target found".to_string()))?
            .to_string();

        self.dispatch.cast_to_compute_host(
            &elevated,
            &host,
            ComputeCommand::PrepResize {
                instance_uuid: spec.instance_properties.uuid.clone(),
                instance_type_id,
            },
        );
        info!(%host, instance_type_id, "resize target selected");
        Ok(host)
    }

    /// Hosts meeting the request, best first, at most `num_instances`.
    pub async fn schedule_hosts(
        &self,
        ctx: &RequestContext,
        topic: &str,
        spec: &RequestSpec,
    ) -> SchedulerResult<Vec<WeightedHost>> {
        self.schedule_pass(ctx, topic, spec, false).await
    }

    async fn schedule_pass(
        &self,
        ctx: &RequestContext,
        topic: &str,
        spec: &RequestSpec,
        force_local: bool,
    ) -> SchedulerResult<Vec<WeightedHost>> {
        let elevated = ctx.elevated();
        if topic != COMPUTE_TOPIC {
            return Err(SchedulerError::NotImplemented(
                "scheduler only understands compute nodes".to_string(),
            ));
        }
        let Some(instance_type) = spec.instance_type.clone() else {
            return Err(SchedulerError::NotImplemented(
                "scheduler only understands instance-type based provisioning".to_string(),
            ));
        };

        let cost_fns = self.cost_functions.get_cost_functions(topic, &self.config)?;
        let mut props = FilterProperties::new(
            ctx.clone(),
            spec.clone(),
            self.options.get_configuration(),
            instance_type,
        )
        .with_local_zone_only(force_local || self.config.scheduler.local_zone_only);
        if let Some(hook) = &self.populate_filter_properties {
            hook(spec, &mut props);
        }

        let count = spec.requested_count();
        let mut working_set =
            HostWorkingSet::new(self.host_states.get_all_host_states(&elevated, topic));
        debug!(hosts = working_set.len(), "host states fetched");
        let mut selected = working_set.select(&self.filters, &cost_fns, &props, count);

        if !props.local_zone_only {
            selected.extend(self.child_zone_hosts(spec).await?);
        }

        sort_by_weight(&mut selected);
        selected.truncate(count);
        debug!(selected = selected.len(), requested = count, "scheduling pass finished");
        Ok(selected)
    }

    async fn child_zone_hosts(&self, spec: &RequestSpec) -> SchedulerResult<Vec<WeightedHost>> {
        let zones = match self.store.zone_get_all() {
            Ok(zones) => zones,
            Err(e) => {
                warn!(error = %e, "zone list unavailable; scheduling without child zones");
                return Ok(Vec::new());
            }
        };
        if zones.is_empty() {
            return Ok(Vec::new());
        }

        let specs = serde_json::to_string(spec)?;
        let results = call_zone_select(
            Arc::clone(&self.zone_client),
            &zones,
            &specs,
            self.config.zone_call_timeout(),
        )
        .await;
        let hosts = adjust_child_weights(&results, &zones);
        debug!(zones = zones.len(), candidates = hosts.len(), "child zone candidates merged");
        Ok(hosts)
    }

    fn provision_resource_locally(
        &self,
        ctx: &RequestContext,
        weighted_host: &WeightedHost,
        spec: &mut RequestSpec,
        injected_files: Vec<(String, String)>,
    ) -> SchedulerResult<ScheduledInstance> {
        let host = weighted_host.host_name().ok_or_else(|| {
            SchedulerError::NoValidHost("candidate names neither a host nor a zone".to_string())
        })?;

        let record = self.store.instance_create(&spec.instance_properties)?;
        self.dispatch.cast_to_compute_host(
            ctx,
            host,
            ComputeCommand::RunInstance {
                instance_uuid: record.uuid.clone(),
                injected_files,
            },
        );
        info!(%host, uuid = %record.uuid, weight = weighted_host.weight, "instance provisioned locally");

        // Later instances of the same request get fresh identities.
        spec.instance_properties.uuid = None;
        Ok(ScheduledInstance::Local(record))
    }

    async fn delegate_to_child_zone(
        &self,
        ctx: &RequestContext,
        zone_id: &str,
        weighted_host: WeightedHost,
        spec: &RequestSpec,
        injected_files: Vec<(String, String)>,
    ) -> SchedulerResult<ScheduledInstance> {
        let instance_type = spec.instance_type.as_ref().ok_or_else(|| {
            SchedulerError::NotImplemented(
                "child zone delegation needs an instance type".to_string(),
            )
        })?;
        let zone = self.store.zone_get(zone_id)?;

        let instance = ask_child_zone_to_create_instance(
            self.zone_client.as_ref(),
            ctx,
            &zone,
            spec,
            instance_type,
            weighted_host.blob,
            injected_files,
            self.config.zone_call_timeout(),
        )
        .await?;

        Ok(ScheduledInstance::Remote {
            zone: zone.id,
            instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::{Map, json};
    use zonegrid_federation::{
        CreateServerRequest, ZoneClientError, ZoneCredentials, ZoneFuture, ZoneSession,
    };
    use zonegrid_placement::{CapabilityReport, HostManager, HostState};
    use zonegrid_state::{InstanceProperties, InstanceType, StateError, Zone};

    // ── Mocks ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingDispatch {
        casts: Mutex<Vec<(String, ComputeCommand)>>,
    }

    impl RecordingDispatch {
        fn casts(&self) -> Vec<(String, ComputeCommand)> {
            self.casts.lock().unwrap().clone()
        }
    }

    impl ComputeDispatch for RecordingDispatch {
        fn cast_to_compute_host(&self, _ctx: &RequestContext, host: &str, command: ComputeCommand) {
            self.casts.lock().unwrap().push((host.to_string(), command));
        }
    }

    #[derive(Default)]
    struct ZoneLog {
        selects: Vec<String>,
        creates: Vec<(String, CreateServerRequest, Option<String>)>,
    }

    /// Answers `select` per zone URL; URLs not listed reject credentials.
    #[derive(Default)]
    struct FakeZones {
        answers: HashMap<String, Vec<Value>>,
        log: Arc<Mutex<ZoneLog>>,
    }

    struct FakeSession {
        url: String,
        token: Option<String>,
        answer: Vec<Value>,
        log: Arc<Mutex<ZoneLog>>,
    }

    impl ZoneSession for FakeSession {
        fn create_server<'a>(&'a self, request: &'a CreateServerRequest) -> ZoneFuture<'a, Value> {
            self.log.lock().unwrap().creates.push((
                self.url.clone(),
                request.clone(),
                self.token.clone(),
            ));
            Box::pin(async move { Ok(json!({"name": request.name, "uuid": "child-uuid"})) })
        }

        fn select<'a>(&'a self, _specs: &'a str) -> ZoneFuture<'a, Vec<Value>> {
            self.log.lock().unwrap().selects.push(self.url.clone());
            let answer = self.answer.clone();
            Box::pin(async move { Ok(answer) })
        }

        fn info(&self) -> ZoneFuture<'_, Map<String, Value>> {
            Box::pin(async { Ok(Map::new()) })
        }
    }

    impl ZoneClient for FakeZones {
        fn authenticate<'a>(
            &'a self,
            api_url: &'a str,
            credentials: &'a ZoneCredentials,
        ) -> ZoneFuture<'a, Box<dyn ZoneSession>> {
            let session = self.answers.get(api_url).map(|answer| FakeSession {
                url: api_url.to_string(),
                token: credentials.auth_token.clone(),
                answer: answer.clone(),
                log: Arc::clone(&self.log),
            });
            Box::pin(async move {
                match session {
                    Some(s) => Ok(Box::new(s) as Box<dyn ZoneSession>),
                    None => Err(ZoneClientError::Unauthorized {
                        url: api_url.to_string(),
                    }),
                }
            })
        }
    }

    // ── Fixtures ──────────────────────────────────────────────────

    struct Harness {
        scheduler: DistributedScheduler,
        store: StateStore,
        dispatch: Arc<RecordingDispatch>,
        zone_log: Arc<Mutex<ZoneLog>>,
    }

    fn tiny() -> InstanceType {
        InstanceType {
            id: 1,
            name: "m1.tiny".to_string(),
            flavorid: "1".to_string(),
            memory_mb: 1024,
            vcpus: 1,
            root_gb: 1,
            ephemeral_gb: 0,
            extra_specs: HashMap::new(),
        }
    }

    fn spec(num_instances: u32) -> RequestSpec {
        let it = tiny();
        let props = InstanceProperties {
            display_name: "vm".to_string(),
            image_ref: "img-1".to_string(),
            reservation_id: "r-1".to_string(),
            instance_type_id: Some(it.id),
            memory_mb: it.memory_mb,
            vcpus: it.vcpus,
            root_gb: it.root_gb,
            ..Default::default()
        };
        let mut spec = RequestSpec::new(props, it);
        spec.num_instances = num_instances;
        spec
    }

    fn report(free_ram_mb: i64) -> CapabilityReport {
        CapabilityReport {
            free_ram_mb,
            free_disk_mb: 100 * 1024,
            vcpus_total: 8,
            vcpus_used: 0,
            enabled: true,
            capabilities: HashMap::new(),
        }
    }

    fn zone(id: &str, offset: Option<f64>, scale: Option<f64>) -> Zone {
        Zone {
            id: id.to_string(),
            name: id.to_string(),
            api_url: format!("http://{id}"),
            username: "admin".to_string(),
            password: "pw".to_string(),
            weight_offset: offset,
            weight_scale: scale,
        }
    }

    fn harness(
        hosts: &[(&str, i64)],
        zones: Vec<(Zone, Vec<Value>)>,
        tweak: impl FnOnce(&mut SchedulerConfig),
    ) -> Harness {
        let mut config = SchedulerConfig::default();
        config.scheduler.host_filters = vec!["compute".to_string(), "ram".to_string()];
        config.scheduler.build_plan_encryption_key = Some("zone-secret".to_string());
        tweak(&mut config);

        let host_manager = Arc::new(HostManager::new());
        for (name, ram) in hosts {
            host_manager.update_service_capabilities("compute", name, report(*ram));
        }

        let store = StateStore::open_in_memory().unwrap();
        store.put_instance_type(&tiny()).unwrap();
        let mut answers = HashMap::new();
        for (z, answer) in zones {
            answers.insert(z.api_url.clone(), answer);
            store.put_zone(&z).unwrap();
        }
        let zone_client = FakeZones {
            answers,
            log: Arc::new(Mutex::new(ZoneLog::default())),
        };
        let zone_log = Arc::clone(&zone_client.log);
        let dispatch = Arc::new(RecordingDispatch::default());

        let scheduler = DistributedScheduler::new(
            config,
            host_manager,
            store.clone(),
            Arc::new(zone_client),
            dispatch.clone(),
        )
        .unwrap();

        Harness {
            scheduler,
            store,
            dispatch,
            zone_log,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("alice", "proj").with_auth_token("alice-token")
    }

    // ── _schedule ─────────────────────────────────────────────────

    #[tokio::test]
    async fn other_topics_are_not_implemented() {
        let h = harness(&[("h1", 4096)], vec![], |_| {});
        let err = h
            .scheduler
            .schedule_hosts(&ctx(), "network", &spec(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn unreadable_zone_table_leaves_local_hosts_schedulable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zonegrid.redb");
        StateStore::open(&path).unwrap();
        {
            let db = redb::Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut zones = txn.open_table(zonegrid_state::tables::ZONES).unwrap();
                zones.insert("broken", b"not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.zone_get_all().is_err());

        let mut config = SchedulerConfig::default();
        config.scheduler.host_filters = vec!["compute".to_string(), "ram".to_string()];
        let host_manager = Arc::new(HostManager::new());
        host_manager.update_service_capabilities("compute", "h1", report(4096));
        let scheduler = DistributedScheduler::new(
            config,
            host_manager,
            store,
            Arc::new(FakeZones::default()),
            Arc::new(RecordingDispatch::default()),
        )
        .unwrap();

        let hosts = scheduler
            .schedule_hosts(&ctx(), "compute", &spec(1))
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_name(), Some("h1"));
    }

    #[tokio::test]
    async fn missing_instance_type_is_not_implemented() {
        let h = harness(&[("h1", 4096)], vec![], |_| {});
        let mut request = spec(1);
        request.instance_type = None;

        let err = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &request)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn returns_n_distinct_hosts_sorted_ascending() {
        // Each host fits exactly one instance.
        let h = harness(&[("h1", 1500), ("h2", 1200), ("h3", 1800), ("h4", 1100)], vec![], |_| {});

        let hosts = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &spec(3))
            .await
            .unwrap();

        let names: Vec<_> = hosts.iter().map(|w| w.host_name().unwrap()).collect();
        assert_eq!(names, vec!["h4", "h2", "h1"]);
        let weights: Vec<_> = hosts.iter().map(|w| w.weight).collect();
        assert_eq!(weights, vec![1100.0, 1200.0, 1500.0]);
    }

    #[tokio::test]
    async fn fewer_hosts_than_requested_is_not_an_error() {
        let h = harness(&[("h1", 1024)], vec![], |c| c.scheduler.local_zone_only = true);
        let hosts = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &spec(3))
            .await
            .unwrap();
        assert_eq!(hosts.len(), 1);
    }

    #[tokio::test]
    async fn child_zone_weights_are_rescaled_and_merged() {
        let h = harness(
            &[("h1", 1500)],
            vec![
                (
                    zone("z1", Some(10.0), Some(2.0)),
                    vec![json!({"weight": 5, "blob": "z1-plan"})],
                ),
                (
                    zone("unscaled", None, Some(1.0)),
                    vec![json!({"weight": 0, "blob": "never"})],
                ),
            ],
            |_| {},
        );

        let hosts = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &spec(2))
            .await
            .unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].zone.as_deref(), Some("z1"));
        assert_eq!(hosts[0].weight, 20.0);
        assert_eq!(hosts[0].blob.as_deref(), Some("z1-plan"));
        assert_eq!(hosts[1].host_name(), Some("h1"));
        assert_eq!(hosts[1].weight, 1500.0);
        assert_eq!(h.zone_log.lock().unwrap().selects.len(), 2);
    }

    #[tokio::test]
    async fn local_zone_only_skips_child_zones() {
        let h = harness(
            &[("h1", 4096)],
            vec![(zone("z1", Some(0.0), Some(1.0)), vec![json!({"weight": 0, "blob": "b"})])],
            |c| c.scheduler.local_zone_only = true,
        );

        let hosts = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &spec(2))
            .await
            .unwrap();
        assert!(hosts.iter().all(|w| w.zone.is_none()));
        assert!(h.zone_log.lock().unwrap().selects.is_empty());
    }

    #[tokio::test]
    async fn populate_hook_can_restrict_to_local_zone() {
        let h = harness(
            &[("h1", 4096)],
            vec![(zone("z1", Some(0.0), Some(1.0)), vec![json!({"weight": 0, "blob": "b"})])],
            |_| {},
        );
        let scheduler = h
            .scheduler
            .with_populate_filter_properties(Box::new(|_spec: &RequestSpec, props: &mut FilterProperties| {
                props.local_zone_only = true;
            }));

        scheduler
            .schedule_hosts(&ctx(), "compute", &spec(1))
            .await
            .unwrap();
        assert!(h.zone_log.lock().unwrap().selects.is_empty());
    }

    #[tokio::test]
    async fn cost_functions_are_cached_across_passes() {
        let h = harness(&[("h1", 4096)], vec![], |_| {});
        h.scheduler
            .schedule_hosts(&ctx(), "compute", &spec(1))
            .await
            .unwrap();

        let registry = h.scheduler.cost_function_registry();
        let first = registry.get_cost_functions("compute", h.scheduler.config()).unwrap();
        let second = registry.get_cost_functions("compute", h.scheduler.config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_cost_function_fails_the_pass() {
        let h = harness(&[("h1", 4096)], vec![], |c| {
            c.scheduler.least_cost_functions = vec!["compute_missing_cost_fn".to_string()];
        });
        let err = h
            .scheduler
            .schedule_hosts(&ctx(), "compute", &spec(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Placement(_)));
    }

    // ── select / schedule ─────────────────────────────────────────

    #[tokio::test]
    async fn select_returns_records() {
        let h = harness(&[("h1", 2048)], vec![], |_| {});
        let records = h.scheduler.select(&ctx(), &spec(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host.as_deref(), Some("h1"));
        assert_eq!(records[0].weight, 2048.0);
        assert!(records[0].zone.is_none());
    }

    #[test]
    fn generic_schedule_never_finds_a_host() {
        let h = harness(&[("h1", 2048)], vec![], |_| {});
        let err = h
            .scheduler
            .schedule(&ctx(), "volume", "create_volume")
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoValidHost(_)));
    }

    // ── run_instance ──────────────────────────────────────────────

    #[tokio::test]
    async fn run_instance_provisions_locally_with_fresh_identities() {
        let h = harness(&[("h1", 2048), ("h2", 1024)], vec![], |_| {});
        let mut request = spec(2);
        request.instance_properties.uuid = Some("placeholder".to_string());

        let created = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        let uuids: Vec<_> = created
            .iter()
            .map(|i| match i {
                ScheduledInstance::Local(r) => r.uuid.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(uuids[0], "placeholder");
        assert_ne!(uuids[1], "placeholder");
        assert!(request.instance_properties.uuid.is_none());

        let casts = h.dispatch.casts();
        let hosts: Vec<_> = casts.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(hosts, vec!["h2", "h1"]);
        assert!(matches!(
            &casts[0].1,
            ComputeCommand::RunInstance { instance_uuid, .. } if instance_uuid == "placeholder"
        ));
        assert_eq!(h.store.list_instances().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_instance_without_hosts_is_no_valid_host() {
        let h = harness(&[], vec![], |c| c.scheduler.local_zone_only = true);
        let err = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut spec(1), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoValidHost(_)));
        assert!(h.dispatch.casts().is_empty());
    }

    #[tokio::test]
    async fn run_instance_uses_build_plan_without_scheduling() {
        let h = harness(&[], vec![], |_| {});
        let plan = WeightedHost::local(3.0, HostState::stub("planned-host", "compute"));
        let mut request = spec(1);
        request.blob = Some(h.scheduler.build_plan_codec().unwrap().encode(&plan).unwrap());

        let created = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(h.dispatch.casts()[0].0, "planned-host");
        assert!(h.zone_log.lock().unwrap().selects.is_empty());
    }

    #[tokio::test]
    async fn corrupt_build_plan_fails_loudly() {
        let h = harness(&[("h1", 4096)], vec![], |_| {});
        let mut request = spec(1);
        request.blob = Some("00ff00ff".to_string());

        let err = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::BuildPlan(_)));
        assert!(h.dispatch.casts().is_empty());
    }

    #[tokio::test]
    async fn build_plan_without_key_is_rejected() {
        let h = harness(&[("h1", 4096)], vec![], |c| {
            c.scheduler.build_plan_encryption_key = None;
        });
        let mut request = spec(1);
        request.blob = Some("00".to_string());

        let err = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::EncryptionKeyNotSet));
    }

    #[tokio::test]
    async fn remote_winner_is_created_by_its_zone_as_the_caller() {
        let h = harness(
            &[],
            vec![(
                zone("z1", Some(0.0), Some(1.0)),
                vec![json!({"weight": 1.0, "blob": "z1-plan"})],
            )],
            |_| {},
        );

        let created = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut spec(1), vec![("/f".to_string(), "x".to_string())])
            .await
            .unwrap();

        match &created[0] {
            ScheduledInstance::Remote { zone, instance } => {
                assert_eq!(zone, "z1");
                assert_eq!(instance["uuid"], "child-uuid");
            }
            other => panic!("unexpected {other:?}"),
        }
        let log = h.zone_log.lock().unwrap();
        let (url, request, token) = &log.creates[0];
        assert_eq!(url, "http://z1");
        assert_eq!(request.zone_blob.as_deref(), Some("z1-plan"));
        assert_eq!(request.flavor_id, "1");
        assert_eq!(request.files.len(), 1);
        assert_eq!(token.as_deref(), Some("alice-token"));
        assert!(h.dispatch.casts().is_empty());
    }

    #[tokio::test]
    async fn remote_plan_for_unreachable_zone_is_not_authorized() {
        let h = harness(&[], vec![], |_| {});
        h.store.put_zone(&zone("locked", Some(0.0), Some(1.0))).unwrap();
        let plan = WeightedHost::remote(1.0, "locked".to_string(), "inner".to_string());
        let mut request = spec(1);
        request.blob = Some(h.scheduler.build_plan_codec().unwrap().encode(&plan).unwrap());

        let err = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn remote_plan_for_unknown_zone_is_a_state_error() {
        let h = harness(&[], vec![], |_| {});
        let plan = WeightedHost::remote(1.0, "ghost".to_string(), "inner".to_string());
        let mut request = spec(1);
        request.blob = Some(h.scheduler.build_plan_codec().unwrap().encode(&plan).unwrap());

        let err = h
            .scheduler
            .schedule_run_instance(&ctx(), &mut request, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::State(StateError::NotFound(_))));
    }

    // ── prep_resize ───────────────────────────────────────────────

    #[tokio::test]
    async fn prep_resize_casts_to_best_local_host() {
        let h = harness(
            &[("big", 8192), ("small", 2048)],
            vec![(zone("z1", Some(-1e9), Some(1.0)), vec![json!({"weight": 0, "blob": "b"})])],
            |_| {},
        );
        let mut request = spec(1);
        request.instance_properties.uuid = Some("inst-1".to_string());

        let host = h
            .scheduler
            .schedule_prep_resize(&ctx(), &request, 1)
            .await
            .unwrap();

        assert_eq!(host, "small");
        assert_eq!(
            h.dispatch.casts(),
            vec![(
                "small".to_string(),
                ComputeCommand::PrepResize {
                    instance_uuid: Some("inst-1".to_string()),
                    instance_type_id: 1,
                }
            )]
        );
        assert!(h.zone_log.lock().unwrap().selects.is_empty());
    }

    #[tokio::test]
    async fn prep_resize_without_room_is_no_valid_host() {
        let h = harness(&[("tiny", 128)], vec![], |_| {});
        let err = h
            .scheduler
            .schedule_prep_resize(&ctx(), &spec(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoValidHost(_)));
    }

    #[tokio::test]
    async fn prep_resize_with_unknown_instance_type_fails() {
        let h = harness(&[("h1", 4096)], vec![], |_| {});
        let err = h
            .scheduler
            .schedule_prep_resize(&ctx(), &spec(1), 99)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::State(StateError::NotFound(_))));
    }

    #[test]
    fn unknown_filter_fails_construction() {
        let mut config = SchedulerConfig::default();
        config.scheduler.host_filters = vec!["gpu".to_string()];
        let result = DistributedScheduler::new(
            config,
            Arc::new(HostManager::new()),
            StateStore::open_in_memory().unwrap(),
            Arc::new(FakeZones::default()),
            Arc::new(RecordingDispatch::default()),
        );
        assert!(matches!(result, Err(SchedulerError::Placement(_))));
    }

    #[test]
    fn scheduled_instance_serializes_with_kind() {
        let remote = ScheduledInstance::Remote {
            zone: "z1".to_string(),
            instance: json!({"uuid": "u"}),
        };
        let json = serde_json::to_value(&remote).unwrap();
        assert_eq!(json["kind"], "remote");
        assert_eq!(json["zone"], "z1");
    }
}
