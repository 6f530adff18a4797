//! Test harness for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through plan, create,
//! read, update and delete without a plugin runtime. [`FakeMetal`] is an
//! in-memory portal: it records every call and moves objects through their
//! asynchronous states one poll at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::client::models::{
    AvailableResources, Host, HostState, IpAllocation, IpPool, Network, NewHost, NewNetwork,
    NewProject, NewSshKey, NewVolume, PowerState, Project, Service, SshKey, UpdateVolume,
    UsageReport, Volume, VolumeAttachment, VolumeState, VolumeSubState,
};
use crate::cache::ResourceCache;
use crate::client::{ApiResult, MetalApi, MetalClient};
use crate::error::ProviderError;
use crate::poll::PollSettings;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_resource_config(resource_type, config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.update(resource_type, prior_state, planned_state).await
    }

    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read_data_source(data_source_type, config).await
    }

    /// Plan, create, then read back. Fails if the read finds nothing.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created)
            .await?
            .ok_or_else(|| {
                ProviderError::Failed(format!("{} vanished after create", resource_type))
            })
    }

    /// Plan an update and apply it in place.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::Validation(format!(
                "update of {} requires replacement",
                resource_type
            )));
        }
        self.update(resource_type, prior_state, plan.planned_state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  {}", diag.summary)?;
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that diagnostics contain an error with the given summary substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}', got {:?}",
        substring,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

// ============================================================================
// In-memory portal
// ============================================================================

/// Transition applied the next time an object is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    PowerOff,
    HostDelete,
    VolumeCreate,
    VolumeUpdate,
    VolumeDelete,
}

/// Mutable contents of a [`FakeMetal`].
#[derive(Debug, Default)]
pub struct FakeState {
    pub resources: AvailableResources,
    pub hosts: BTreeMap<String, Host>,
    pub volumes: BTreeMap<String, Volume>,
    pub attachments: Vec<VolumeAttachment>,
    pub networks: BTreeMap<String, Network>,
    pub projects: BTreeMap<String, Project>,
    pub ssh_keys: BTreeMap<String, SshKey>,
    pub ip_pools: BTreeMap<String, IpPool>,
    pub services: BTreeMap<String, Service>,
    pub usage: UsageReport,
    /// Every call, as `"<method> <arg>"`.
    pub calls: Vec<String>,
    /// Request bodies of creates, for assertions.
    pub last_new_host: Option<NewHost>,
    pub last_new_volume: Option<NewVolume>,
    pub last_new_network: Option<NewNetwork>,
    pub last_new_project: Option<NewProject>,
    pub last_volume_update: Option<UpdateVolume>,
    pub last_usage_query: Option<(DateTime<Utc>, Option<DateTime<Utc>>)>,
    /// Power-off ends in `FAILED`.
    pub power_off_fails: bool,
    /// Host delete ends in `FAILED`.
    pub host_delete_fails: bool,
    /// Volume delete ends in `FAILED`.
    pub volume_delete_fails: bool,
    /// Volume updates never leave `UPDATE_REQUESTED`.
    pub volume_update_stuck: bool,
    /// Volumes stay `VISIBLE` after their attachments are removed.
    pub volume_stays_visible: bool,
    /// `available_resources` answers 503.
    pub resources_unavailable: bool,
    /// `list_volume_attachments` answers 503.
    pub attachments_unavailable: bool,
    pending: HashMap<String, Pending>,
    next_id: u32,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }
}

/// In-memory [`MetalApi`].
#[derive(Debug, Default)]
pub struct FakeMetal {
    state: Mutex<FakeState>,
}

fn missing(kind: &str, id: &str) -> ProviderError {
    ProviderError::api(404, &format!("{{\"message\": \"{} {} not found\"}}", kind, id))
}

impl FakeMetal {
    /// A portal whose available resources are `resources`.
    pub fn new(resources: AvailableResources) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                resources,
                ..Default::default()
            }),
        })
    }

    /// Lock the state for setup or assertions.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Recorded calls whose method name is `method`.
    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .cloned()
            .collect()
    }

    /// Position of the first call equal to `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| c == call)
    }

    /// A client over this portal with a 1 ms poll interval and `max_polls`.
    pub fn client(self: &Arc<Self>, max_polls: u32) -> MetalClient {
        let poll = PollSettings {
            interval: Duration::from_millis(1),
            max_polls,
            delete_timeout: Duration::from_secs(5),
        };
        let mut client = MetalClient::new(self.clone(), poll);
        client.cache = ResourceCache::with_snapshot(self.state().resources.clone());
        client
    }

    fn settle_host(st: &mut FakeState, id: &str) {
        let Some(pending) = st.pending.remove(id) else {
            return;
        };
        let fail_power = st.power_off_fails;
        let fail_delete = st.host_delete_fails;
        if let Some(host) = st.hosts.get_mut(id) {
            match pending {
                Pending::PowerOff if fail_power => host.state = HostState::Failed,
                Pending::PowerOff => host.power_status = PowerState::Off,
                Pending::HostDelete if fail_delete => host.state = HostState::Failed,
                Pending::HostDelete => host.state = HostState::Deleted,
                _ => {},
            }
        }
    }

    fn settle_volume(st: &mut FakeState, id: &str) {
        let attached = st.attachments.iter().any(|a| a.volume_id == id);
        let stays_visible = st.volume_stays_visible;
        let pending = st.pending.get(id).copied();
        let fail_delete = st.volume_delete_fails;
        let stuck = st.volume_update_stuck;

        let Some(vol) = st.volumes.get_mut(id) else {
            return;
        };
        if vol.state == VolumeState::Visible && !attached && !stays_visible {
            vol.state = VolumeState::Allocated;
        }
        match pending {
            Some(Pending::VolumeCreate) => vol.state = VolumeState::Allocated,
            Some(Pending::VolumeUpdate) if stuck => return,
            Some(Pending::VolumeUpdate) => vol.sub_state = VolumeSubState::Idle,
            Some(Pending::VolumeDelete) if fail_delete => vol.state = VolumeState::Failed,
            Some(Pending::VolumeDelete) => vol.state = VolumeState::Deleted,
            _ => return,
        }
        st.pending.remove(id);
    }
}

#[async_trait::async_trait]
impl MetalApi for FakeMetal {
    async fn available_resources(&self) -> ApiResult<AvailableResources> {
        let mut st = self.state();
        st.record("available_resources");
        if st.resources_unavailable {
            return Err(ProviderError::api(503, "portal is busy"));
        }
        Ok(st.resources.clone())
    }

    async fn add_host(&self, new: &NewHost) -> ApiResult<Host> {
        let mut st = self.state();
        st.record(format!("add_host {}", new.name));
        let id = st.id("host");
        let (flavor, version) = st
            .resources
            .images
            .iter()
            .find(|i| i.id == new.service_id)
            .map(|i| (i.flavor.clone(), i.version.clone()))
            .unwrap_or_default();
        let size_name = st
            .resources
            .machine_sizes
            .iter()
            .find(|s| s.id == new.machine_size_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let host = Host {
            id: id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            location_id: new.location_id.clone(),
            state: HostState::New,
            power_status: PowerState::On,
            service_flavor: flavor,
            service_version: version,
            ssh_authorized_keys: new.ssh_key_ids.clone(),
            machine_size_id: new.machine_size_id.clone(),
            machine_size_name: size_name,
            network_ids: new.network_ids.clone(),
            network_for_default_route: new.network_for_default_route.clone(),
            network_untagged: new.network_untagged.clone(),
            user_data: new.user_data.clone(),
            labels: new.labels.clone(),
            etag: "etag-1".into(),
            ..Default::default()
        };
        for volume_id in &new.volume_ids {
            st.attachments.push(VolumeAttachment {
                id: format!("va-{}-{}", volume_id, id),
                name: volume_id.clone(),
                host_id: id.clone(),
                volume_id: volume_id.clone(),
                volume_target_ip_address: "10.0.9.1".into(),
                volume_target_iqn: format!("iqn.2024-01.fake:{}", volume_id),
            });
        }
        st.hosts.insert(id, host.clone());
        st.last_new_host = Some(new.clone());
        Ok(host)
    }

    async fn get_host(&self, id: &str) -> ApiResult<Host> {
        let mut st = self.state();
        st.record(format!("get_host {}", id));
        Self::settle_host(&mut st, id);
        st.hosts.get(id).cloned().ok_or_else(|| missing("host", id))
    }

    async fn update_host(&self, host: &Host) -> ApiResult<Host> {
        let mut st = self.state();
        st.record(format!("update_host {}", host.id));
        let current = st.hosts.get_mut(&host.id).ok_or_else(|| missing("host", &host.id))?;
        if current.etag != host.etag {
            return Err(ProviderError::api(412, "etag mismatch"));
        }
        *current = host.clone();
        current.etag = format!("{}+", host.etag);
        Ok(current.clone())
    }

    async fn delete_host(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_host {}", id));
        if !st.hosts.contains_key(id) {
            return Err(missing("host", id));
        }
        st.pending.insert(id.to_string(), Pending::HostDelete);
        Ok(())
    }

    async fn power_off_host(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("power_off_host {}", id));
        if !st.hosts.contains_key(id) {
            return Err(missing("host", id));
        }
        st.pending.insert(id.to_string(), Pending::PowerOff);
        Ok(())
    }

    async fn add_volume(&self, new: &NewVolume) -> ApiResult<Volume> {
        let mut st = self.state();
        st.record(format!("add_volume {}", new.name));
        let id = st.id("vol");
        let volume = Volume {
            id: id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            location_id: new.location_id.clone(),
            flavor_id: new.flavor_id.clone(),
            storage_pool_id: new.storage_pool_id.clone(),
            volume_collection_id: new.volume_collection_id.clone(),
            capacity: new.capacity,
            shareable: new.shareable,
            state: VolumeState::New,
            sub_state: VolumeSubState::Idle,
            status: "ok".into(),
            wwn: format!("wwn-{}", id),
            labels: new.labels.clone(),
            etag: "etag-1".into(),
            ..Default::default()
        };
        st.volumes.insert(id.clone(), volume.clone());
        st.pending.insert(id, Pending::VolumeCreate);
        st.last_new_volume = Some(new.clone());
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> ApiResult<Volume> {
        let mut st = self.state();
        st.record(format!("get_volume {}", id));
        Self::settle_volume(&mut st, id);
        st.volumes.get(id).cloned().ok_or_else(|| missing("volume", id))
    }

    async fn list_volumes(&self) -> ApiResult<Vec<Volume>> {
        let mut st = self.state();
        st.record("list_volumes");
        Ok(st.volumes.values().cloned().collect())
    }

    async fn update_volume(&self, update: &UpdateVolume) -> ApiResult<Volume> {
        let mut st = self.state();
        st.record(format!("update_volume {}", update.id));
        let vol = st.volumes.get_mut(&update.id).ok_or_else(|| missing("volume", &update.id))?;
        if vol.etag != update.etag {
            return Err(ProviderError::api(412, "etag mismatch"));
        }
        vol.capacity = update.capacity;
        vol.description = update.description.clone();
        vol.labels = update.labels.clone();
        vol.sub_state = VolumeSubState::UpdateRequested;
        vol.etag = format!("{}+", vol.etag);
        let vol = vol.clone();
        st.pending.insert(update.id.clone(), Pending::VolumeUpdate);
        st.last_volume_update = Some(update.clone());
        Ok(vol)
    }

    async fn delete_volume(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_volume {}", id));
        if !st.volumes.contains_key(id) {
            return Err(missing("volume", id));
        }
        st.pending.insert(id.to_string(), Pending::VolumeDelete);
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("attach_volume {}", volume_id));
        st.attachments.push(VolumeAttachment {
            id: format!("va-{}-{}", volume_id, host_id),
            name: volume_id.to_string(),
            host_id: host_id.to_string(),
            volume_id: volume_id.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("detach_volume {}", volume_id));
        st.attachments
            .retain(|a| !(a.volume_id == volume_id && a.host_id == host_id));
        Ok(())
    }

    async fn list_volume_attachments(&self) -> ApiResult<Vec<VolumeAttachment>> {
        let mut st = self.state();
        st.record("list_volume_attachments");
        if st.attachments_unavailable {
            return Err(ProviderError::api(503, "storage is busy"));
        }
        Ok(st.attachments.clone())
    }

    async fn delete_volume_attachment(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_volume_attachment {}", id));
        st.attachments.retain(|a| a.id != id);
        Ok(())
    }

    async fn add_network(&self, new: &NewNetwork) -> ApiResult<Network> {
        let mut st = self.state();
        st.record(format!("add_network {}", new.name));
        let id = st.id("net");
        let host_use = if new.host_use.is_empty() {
            "Optional".to_string()
        } else {
            new.host_use.clone()
        };
        let ip_pool_id = new
            .new_ip_pool
            .as_ref()
            .map(|_| format!("pool-{}", id))
            .unwrap_or_default();
        let network = Network {
            id: id.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            location_id: new.location_id.clone(),
            host_use,
            purpose: new.purpose.clone(),
            kind: "Custom".into(),
            ip_pool_id,
            etag: "etag-1".into(),
            ..Default::default()
        };
        st.networks.insert(id, network.clone());
        st.resources.networks.push(network.clone());
        st.last_new_network = Some(new.clone());
        Ok(network)
    }

    async fn get_network(&self, id: &str) -> ApiResult<Network> {
        let mut st = self.state();
        st.record(format!("get_network {}", id));
        st.networks.get(id).cloned().ok_or_else(|| missing("network", id))
    }

    async fn update_network(&self, network: &Network) -> ApiResult<Network> {
        let mut st = self.state();
        st.record(format!("update_network {}", network.id));
        let current = st
            .networks
            .get_mut(&network.id)
            .ok_or_else(|| missing("network", &network.id))?;
        *current = network.clone();
        Ok(current.clone())
    }

    async fn delete_network(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_network {}", id));
        st.networks.remove(id).ok_or_else(|| missing("network", id))?;
        st.resources.networks.retain(|n| n.id != id);
        Ok(())
    }

    async fn list_ip_pools(&self) -> ApiResult<Vec<IpPool>> {
        let mut st = self.state();
        st.record("list_ip_pools");
        Ok(st.ip_pools.values().cloned().collect())
    }

    async fn get_ip_pool(&self, id: &str) -> ApiResult<IpPool> {
        let mut st = self.state();
        st.record(format!("get_ip_pool {}", id));
        st.ip_pools.get(id).cloned().ok_or_else(|| missing("ip pool", id))
    }

    async fn allocate_ips(&self, pool_id: &str, allocations: &[IpAllocation]) -> ApiResult<IpPool> {
        let mut st = self.state();
        st.record(format!("allocate_ips {}", pool_id));
        let pool = st.ip_pools.get_mut(pool_id).ok_or_else(|| missing("ip pool", pool_id))?;
        pool.use_records.extend(allocations.iter().cloned());
        Ok(pool.clone())
    }

    async fn return_ips(&self, pool_id: &str, ips: &[String]) -> ApiResult<IpPool> {
        let mut st = self.state();
        st.record(format!("return_ips {}", pool_id));
        let pool = st.ip_pools.get_mut(pool_id).ok_or_else(|| missing("ip pool", pool_id))?;
        pool.use_records.retain(|r| !ips.contains(&r.base));
        Ok(pool.clone())
    }

    async fn add_project(&self, new: &NewProject) -> ApiResult<Project> {
        let mut st = self.state();
        st.record(format!("add_project {}", new.name));
        let id = st.id("proj");
        let project = Project {
            id: id.clone(),
            name: new.name.clone(),
            profile: new.profile.clone(),
            limits: new.limits.clone(),
            permitted_sites: new.permitted_sites.clone(),
            permitted_images: new.permitted_images.clone(),
            boot_from_san_allowed: new.boot_from_san_allowed,
            replication_allowed: new.replication_allowed,
            etag: "etag-1".into(),
        };
        st.projects.insert(id, project.clone());
        st.last_new_project = Some(new.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> ApiResult<Project> {
        let mut st = self.state();
        st.record(format!("get_project {}", id));
        st.projects.get(id).cloned().ok_or_else(|| missing("project", id))
    }

    async fn update_project(&self, project: &Project) -> ApiResult<Project> {
        let mut st = self.state();
        st.record(format!("update_project {}", project.id));
        let current = st
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| missing("project", &project.id))?;
        if current.etag != project.etag {
            return Err(ProviderError::api(412, "etag mismatch"));
        }
        *current = project.clone();
        current.etag = format!("{}+", project.etag);
        Ok(current.clone())
    }

    async fn delete_project(&self, id: &str, etag: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_project {} {}", id, etag));
        let current = st.projects.get(id).ok_or_else(|| missing("project", id))?;
        if current.etag != etag {
            return Err(ProviderError::api(412, "etag mismatch"));
        }
        st.projects.remove(id);
        Ok(())
    }

    async fn add_ssh_key(&self, new: &NewSshKey) -> ApiResult<SshKey> {
        let mut st = self.state();
        st.record(format!("add_ssh_key {}", new.name));
        let id = st.id("key");
        let key = SshKey {
            id: id.clone(),
            name: new.name.clone(),
            key: new.key.clone(),
            etag: "etag-1".into(),
        };
        st.ssh_keys.insert(id, key.clone());
        Ok(key)
    }

    async fn get_ssh_key(&self, id: &str) -> ApiResult<SshKey> {
        let mut st = self.state();
        st.record(format!("get_ssh_key {}", id));
        st.ssh_keys.get(id).cloned().ok_or_else(|| missing("ssh key", id))
    }

    async fn update_ssh_key(&self, key: &SshKey) -> ApiResult<SshKey> {
        let mut st = self.state();
        st.record(format!("update_ssh_key {}", key.id));
        let current = st.ssh_keys.get_mut(&key.id).ok_or_else(|| missing("ssh key", &key.id))?;
        *current = key.clone();
        Ok(current.clone())
    }

    async fn delete_ssh_key(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_ssh_key {}", id));
        st.ssh_keys.remove(id).map(|_| ()).ok_or_else(|| missing("ssh key", id))
    }

    async fn add_service(&self, file_name: &str, contents: Vec<u8>) -> ApiResult<Service> {
        let mut st = self.state();
        st.record(format!("add_service {}", file_name));
        let id = st.id("svc");
        let service = fake_service(&id, &contents);
        st.services.insert(id, service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        id: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> ApiResult<Service> {
        let mut st = self.state();
        st.record(format!("update_service {} {}", id, file_name));
        if !st.services.contains_key(id) {
            return Err(missing("service", id));
        }
        let service = fake_service(id, &contents);
        st.services.insert(id.to_string(), service.clone());
        Ok(service)
    }

    async fn delete_service(&self, id: &str) -> ApiResult<()> {
        let mut st = self.state();
        st.record(format!("delete_service {}", id));
        st.services.remove(id).map(|_| ()).ok_or_else(|| missing("service", id))
    }

    async fn usage_report(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> ApiResult<UsageReport> {
        let mut st = self.state();
        st.record("usage_report");
        st.last_usage_query = Some((start, end));
        Ok(st.usage.clone())
    }
}

/// A service whose flavor and version are read from `flavor:`/`version:`
/// lines of the uploaded file.
fn fake_service(id: &str, contents: &[u8]) -> Service {
    let text = String::from_utf8_lossy(contents);
    let field = |name: &str| {
        text.lines()
            .find_map(|l| l.trim().strip_prefix(name).map(|v| v.trim().to_string()))
            .unwrap_or_default()
    };
    Service {
        id: id.to_string(),
        name: field("name:"),
        flavor: field("flavor:"),
        version: field("version:"),
        category: field("category:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;

    #[tokio::test]
    async fn test_fake_host_power_off_then_delete() {
        let fake = FakeMetal::new(sample());
        let host = fake
            .add_host(&NewHost {
                name: "web-1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        fake.power_off_host(&host.id).await.unwrap();
        assert_eq!(fake.get_host(&host.id).await.unwrap().power_status, PowerState::Off);

        fake.delete_host(&host.id).await.unwrap();
        assert_eq!(fake.get_host(&host.id).await.unwrap().state, HostState::Deleted);
        let power_off = fake.position("power_off_host host-1").unwrap();
        assert!(power_off < fake.position("delete_host host-1").unwrap());
    }

    #[tokio::test]
    async fn test_fake_missing_is_404() {
        let fake = FakeMetal::new(sample());
        let err = fake.get_volume("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message(), "volume nope not found");
    }

    #[test]
    fn test_fake_service_fields() {
        let svc = fake_service("svc-1", b"name: Ubuntu\nflavor: ubuntu\nversion: 22.04\n");
        assert_eq!(svc.flavor, "ubuntu");
        assert_eq!(svc.version, "22.04");
    }

    #[test]
    fn test_fake_client_seeds_cache() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(5);
        assert_eq!(client.poll.max_polls, 5);
    }
}
