//! Access to the Metal REST API.
//!
//! [`MetalApi`] is the seam between resource handlers and the network. The
//! provider talks to [`RestClient`]; tests swap in an in-memory fake.

pub mod models;
mod rest;

pub use rest::RestClient;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cache::ResourceCache;
use crate::error::ProviderError;
use crate::poll::PollSettings;
use models::{
    AvailableResources, Host, IpAllocation, IpPool, Network, NewHost, NewNetwork, NewProject,
    NewSshKey, NewVolume, Project, Service, SshKey, UpdateVolume, UsageReport, Volume,
    VolumeAttachment,
};

/// Result alias for API calls.
pub type ApiResult<T> = Result<T, ProviderError>;

/// Operations the provider needs from the portal.
#[async_trait::async_trait]
pub trait MetalApi: Send + Sync {
    /// `GET /available-resources`.
    async fn available_resources(&self) -> ApiResult<AvailableResources>;

    // =========================================================================
    // Hosts
    // =========================================================================

    async fn add_host(&self, host: &NewHost) -> ApiResult<Host>;
    async fn get_host(&self, id: &str) -> ApiResult<Host>;
    /// Replace a host; the body carries the ETag read earlier.
    async fn update_host(&self, host: &Host) -> ApiResult<Host>;
    async fn delete_host(&self, id: &str) -> ApiResult<()>;
    async fn power_off_host(&self, id: &str) -> ApiResult<()>;

    // =========================================================================
    // Volumes
    // =========================================================================

    async fn add_volume(&self, volume: &NewVolume) -> ApiResult<Volume>;
    async fn get_volume(&self, id: &str) -> ApiResult<Volume>;
    async fn list_volumes(&self) -> ApiResult<Vec<Volume>>;
    async fn update_volume(&self, volume: &UpdateVolume) -> ApiResult<Volume>;
    async fn delete_volume(&self, id: &str) -> ApiResult<()>;
    async fn attach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()>;
    async fn detach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()>;
    async fn list_volume_attachments(&self) -> ApiResult<Vec<VolumeAttachment>>;
    async fn delete_volume_attachment(&self, id: &str) -> ApiResult<()>;

    // =========================================================================
    // Networks and IP pools
    // =========================================================================

    async fn add_network(&self, network: &NewNetwork) -> ApiResult<Network>;
    async fn get_network(&self, id: &str) -> ApiResult<Network>;
    async fn update_network(&self, network: &Network) -> ApiResult<Network>;
    async fn delete_network(&self, id: &str) -> ApiResult<()>;
    async fn list_ip_pools(&self) -> ApiResult<Vec<IpPool>>;
    async fn get_ip_pool(&self, id: &str) -> ApiResult<IpPool>;
    async fn allocate_ips(&self, pool_id: &str, allocations: &[IpAllocation]) -> ApiResult<IpPool>;
    async fn return_ips(&self, pool_id: &str, ips: &[String]) -> ApiResult<IpPool>;

    // =========================================================================
    // Projects and SSH keys
    // =========================================================================

    async fn add_project(&self, project: &NewProject) -> ApiResult<Project>;
    async fn get_project(&self, id: &str) -> ApiResult<Project>;
    async fn update_project(&self, project: &Project) -> ApiResult<Project>;
    /// Delete a project; `etag` is sent as `If-Match`.
    async fn delete_project(&self, id: &str, etag: &str) -> ApiResult<()>;
    async fn add_ssh_key(&self, key: &NewSshKey) -> ApiResult<SshKey>;
    async fn get_ssh_key(&self, id: &str) -> ApiResult<SshKey>;
    async fn update_ssh_key(&self, key: &SshKey) -> ApiResult<SshKey>;
    async fn delete_ssh_key(&self, id: &str) -> ApiResult<()>;

    // =========================================================================
    // Services and usage
    // =========================================================================

    /// Upload an OS service definition.
    async fn add_service(&self, file_name: &str, contents: Vec<u8>) -> ApiResult<Service>;
    /// Replace the definition of an existing service.
    async fn update_service(
        &self,
        id: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> ApiResult<Service>;
    async fn delete_service(&self, id: &str) -> ApiResult<()>;
    /// Usage between `start` and `end` (now when `None`).
    async fn usage_report(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> ApiResult<UsageReport>;
}

/// Everything a resource handler needs: the API, the snapshot cache, and
/// poll timing. Shared by all operations of one configured provider.
pub struct MetalClient {
    /// The portal API.
    pub api: Arc<dyn MetalApi>,
    /// Snapshot used for name resolution.
    pub cache: ResourceCache,
    /// Timing for state waits.
    pub poll: PollSettings,
    /// True when acting across projects (GreenLake mode without a project).
    pub hoster: bool,
}

impl MetalClient {
    /// A client with an empty cache.
    pub fn new(api: Arc<dyn MetalApi>, poll: PollSettings) -> Self {
        Self {
            api,
            cache: ResourceCache::new(),
            poll,
            hoster: false,
        }
    }

    /// Mark the client as acting in hoster context.
    pub fn with_hoster(mut self, hoster: bool) -> Self {
        self.hoster = hoster;
        self
    }

    /// The current available-resources snapshot.
    pub async fn snapshot(&self) -> Arc<AvailableResources> {
        self.cache.snapshot().await
    }

    /// Replace the snapshot with a fresh one from the portal.
    pub async fn refresh(&self) -> ApiResult<Arc<AvailableResources>> {
        self.cache.refresh(self.api.as_ref()).await
    }

    /// Refresh after a completed delete; a failure is logged, not returned.
    pub async fn refresh_after_delete(&self, what: &str) {
        if let Err(e) = self.refresh().await {
            warn!(what, error = %e, "Failed to refresh available resources after delete");
        }
    }
}

impl std::fmt::Debug for MetalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalClient")
            .field("poll", &self.poll)
            .field("hoster", &self.hoster)
            .finish_non_exhaustive()
    }
}
