//! SchedulerManager: the scheduler service front-end.
//!
//! Owns the host manager and the zone poller next to the distributed
//! scheduler. Failed scheduling is recorded on the instance; running out
//! of hosts is not an error at this level.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use zonegrid_core::{RequestContext, SchedulerConfig};
use zonegrid_federation::{ZoneClient, ZoneInfo, ZoneManager};
use zonegrid_placement::{CapabilityReport, HostManager, WeightedHostRecord};
use zonegrid_state::{InstanceTypeId, InstanceUpdate, RequestSpec, StateStore, VmState};

use crate::dispatch::ComputeDispatch;
use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::{DistributedScheduler, ScheduledInstance};

/// Chooses hosts to run instances on.
pub struct SchedulerManager {
    scheduler: DistributedScheduler,
    host_manager: Arc<HostManager>,
    zone_manager: Mutex<ZoneManager>,
    store: StateStore,
    zone_client: Arc<dyn ZoneClient>,
}

impl SchedulerManager {
    pub fn new(
        config: SchedulerConfig,
        store: StateStore,
        zone_client: Arc<dyn ZoneClient>,
        dispatch: Arc<dyn ComputeDispatch>,
    ) -> SchedulerResult<Self> {
        let host_manager = Arc::new(HostManager::new());
        let zone_manager = Mutex::new(ZoneManager::new(&config));
        let scheduler = DistributedScheduler::new(
            config,
            host_manager.clone(),
            store.clone(),
            Arc::clone(&zone_client),
            dispatch,
        )?;

        Ok(Self {
            scheduler,
            host_manager,
            zone_manager,
            store,
            zone_client,
        })
    }

    pub fn scheduler(&self) -> &DistributedScheduler {
        &self.scheduler
    }

    /// Record a capability update from a service node.
    pub fn update_service_capabilities(&self, service: &str, host: &str, report: CapabilityReport) {
        self.host_manager
            .update_service_capabilities(service, host, report);
    }

    /// `(host, service)` pairs known to the host manager.
    pub fn get_host_list(&self) -> Vec<(String, String)> {
        self.host_manager.get_host_list()
    }

    pub async fn get_zone_list(&self) -> Vec<ZoneInfo> {
        self.zone_manager.lock().await.get_zone_list()
    }

    /// Refresh and poll child zones; meant to run periodically.
    pub async fn poll_child_zones(&self) -> SchedulerResult<()> {
        let mut zones = self.zone_manager.lock().await;
        zones
            .update(&self.store, Arc::clone(&self.zone_client))
            .await?;
        Ok(())
    }

    pub async fn select(
        &self,
        ctx: &RequestContext,
        spec: &RequestSpec,
    ) -> SchedulerResult<Vec<WeightedHostRecord>> {
        self.scheduler.select(ctx, spec).await
    }

    /// Create the requested instances. An empty list means no host
    /// could take them; the instance, if known, is then in error state.
    pub async fn run_instance(
        &self,
        ctx: &RequestContext,
        mut spec: RequestSpec,
        injected_files: Vec<(String, String)>,
    ) -> SchedulerResult<Vec<ScheduledInstance>> {
        let instance_uuid = spec.instance_properties.uuid.clone();
        let result = self
            .scheduler
            .schedule_run_instance(ctx, &mut spec, injected_files)
            .await;

        match result {
            Ok(instances) => {
                info!(created = instances.len(), "run_instance scheduled");
                Ok(instances)
            }
            Err(e) => {
                warn!(method = "run_instance", error = %e, "failed to schedule");
                if let Some(uuid) = instance_uuid.as_deref() {
                    self.set_instance_error(uuid);
                }
                swallow_no_valid_host(e).map(|()| Vec::new())
            }
        }
    }

    /// Pick and notify a resize target. `None` means no host was found.
    pub async fn prep_resize(
        &self,
        ctx: &RequestContext,
        spec: &RequestSpec,
        instance_type_id: InstanceTypeId,
    ) -> SchedulerResult<Option<String>> {
        match self
            .scheduler
            .schedule_prep_resize(ctx, spec, instance_type_id)
            .await
        {
            Ok(host) => Ok(Some(host)),
            Err(e) => {
                warn!(method = "prep_resize", error = %e, "failed to schedule");
                swallow_no_valid_host(e).map(|()| None)
            }
        }
    }

    /// Fallback for methods without a dedicated scheduler entry point.
    pub fn schedule(&self, ctx: &RequestContext, topic: &str, method: &str) -> SchedulerResult<()> {
        warn!(%method, "no dedicated scheduler method, reverting to schedule()");
        self.scheduler
            .schedule(ctx, topic, method)
            .or_else(|e| {
                warn!(%method, error = %e, "failed to schedule");
                swallow_no_valid_host(e)
            })
    }

    fn set_instance_error(&self, uuid: &str) {
        warn!(%uuid, "setting instance to error state");
        let update = InstanceUpdate {
            vm_state: Some(VmState::Error),
            host: None,
        };
        if let Err(e) = self.store.instance_update(uuid, &update) {
            warn!(%uuid, error = %e, "could not mark instance as errored");
        }
    }
}

fn swallow_no_valid_host(e: SchedulerError) -> SchedulerResult<()> {
    match e {
        SchedulerError::NoValidHost(_) => Ok(()),
        other => Err(other),
    }
}
