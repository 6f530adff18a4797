//! Snapshot of the portal's available resources and name lookups over it.
//!
//! The snapshot is replaced wholesale on every refresh. Readers hold an
//! `Arc` to the snapshot they started with and never observe a partial
//! update.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::client::models::{AvailableResources, Location, Network};
use crate::client::MetalApi;
use crate::error::ProviderError;

/// Shared, swappable [`AvailableResources`] snapshot.
#[derive(Debug, Default)]
pub struct ResourceCache {
    current: RwLock<Arc<AvailableResources>>,
}

impl ResourceCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache seeded with `snapshot`.
    pub fn with_snapshot(snapshot: AvailableResources) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<AvailableResources> {
        self.current.read().await.clone()
    }

    /// Fetch a fresh snapshot from the portal and swap it in.
    pub async fn refresh(
        &self,
        api: &dyn MetalApi,
    ) -> Result<Arc<AvailableResources>, ProviderError> {
        let fresh = Arc::new(api.available_resources().await?);
        debug!(
            locations = fresh.locations.len(),
            networks = fresh.networks.len(),
            volumes = fresh.volumes.len(),
            "Refreshed available resources"
        );
        self.replace(fresh.clone()).await;
        Ok(fresh)
    }

    /// Swap in `snapshot`.
    pub async fn replace(&self, snapshot: Arc<AvailableResources>) {
        *self.current.write().await = snapshot;
    }
}

/// `country:region:data-center` for a location.
pub fn location_label(location: &Location) -> String {
    format!("{}:{}:{}", location.country, location.region, location.data_center)
}

/// Find the entry whose name or ID equals `key`, or fail listing every name.
fn by_name_or_id<'a, T>(
    kind: &'static str,
    key: &str,
    items: &'a [T],
    id: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Result<&'a T, ProviderError> {
    items
        .iter()
        .find(|&item| id(item) == key || name(item) == key)
        .ok_or_else(|| {
            ProviderError::not_found(kind, key, items.iter().map(|i| name(i).to_string()))
        })
}

fn name_of<T>(
    kind: &'static str,
    key: &str,
    items: &[T],
    id: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Result<String, ProviderError> {
    items
        .iter()
        .find(|&item| id(item) == key)
        .map(|item| name(item).to_string())
        .ok_or_else(|| ProviderError::not_found(kind, key, items.iter().map(|i| id(i).to_string())))
}

impl AvailableResources {
    /// `country:region:data-center` for the location with `id`.
    pub fn location_name(&self, id: &str) -> Result<String, ProviderError> {
        self.locations
            .iter()
            .find(|l| l.id == id)
            .map(location_label)
            .ok_or_else(|| {
                let ids = self.locations.iter().map(|l| l.id.clone());
                ProviderError::not_found("location", id, ids)
            })
    }

    /// ID of the location named `country:region:data-center`.
    pub fn location_id(&self, name: &str) -> Result<String, ProviderError> {
        let parts: Vec<&str> = name.split(':').collect();
        let [country, region, data_center] = parts.as_slice() else {
            return Err(ProviderError::Validation(format!(
                "{:?} must be of the form country:region:data-center",
                name
            )));
        };
        self.locations
            .iter()
            .find(|l| {
                l.country == *country && l.region == *region && l.data_center == *data_center
            })
            .map(|l| l.id.clone())
            .ok_or_else(|| {
                let labels = self.locations.iter().map(location_label);
                ProviderError::not_found("location", name, labels)
            })
    }

    pub fn volume_flavor_name(&self, id: &str) -> Result<String, ProviderError> {
        name_of(
            "volume flavor",
            id,
            &self.volume_flavors,
            |f| f.id.as_str(),
            |f| f.name.as_str(),
        )
    }

    /// ID of the volume flavor with this name or ID.
    pub fn volume_flavor_id(&self, name_or_id: &str) -> Result<String, ProviderError> {
        by_name_or_id(
            "volume flavor",
            name_or_id,
            &self.volume_flavors,
            |f| f.id.as_str(),
            |f| f.name.as_str(),
        )
        .map(|f| f.id.clone())
    }

    pub fn storage_pool_name(&self, id: &str) -> Result<String, ProviderError> {
        name_of("storage pool", id, &self.storage_pools, |p| p.id.as_str(), |p| p.name.as_str())
    }

    /// ID of the storage pool with this name or ID.
    pub fn storage_pool_id(&self, name_or_id: &str) -> Result<String, ProviderError> {
        by_name_or_id(
            "storage pool",
            name_or_id,
            &self.storage_pools,
            |p| p.id.as_str(),
            |p| p.name.as_str(),
        )
        .map(|p| p.id.clone())
    }

    /// Name of the volume collection with `id`; empty for an empty ID.
    pub fn volume_collection_name(&self, id: &str) -> Result<String, ProviderError> {
        if id.is_empty() {
            return Ok(String::new());
        }
        name_of(
            "volume collection",
            id,
            &self.volume_collections,
            |c| c.id.as_str(),
            |c| c.name.as_str(),
        )
    }

    /// ID of the volume collection with this name or ID; empty for empty input.
    pub fn volume_collection_id(&self, name_or_id: &str) -> Result<String, ProviderError> {
        if name_or_id.is_empty() {
            return Ok(String::new());
        }
        by_name_or_id(
            "volume collection",
            name_or_id,
            &self.volume_collections,
            |c| c.id.as_str(),
            |c| c.name.as_str(),
        )
        .map(|c| c.id.clone())
    }

    /// Name of the network with `id`, if the snapshot knows it.
    pub fn network_name(&self, id: &str) -> Option<&str> {
        self.networks.iter().find(|n| n.id == id).map(|n| n.name.as_str())
    }

    /// Networks at one location.
    pub fn networks_in(&self, location_id: &str) -> Vec<&Network> {
        self.networks.iter().filter(|n| n.location_id == location_id).collect()
    }

    /// Free machines of `size_id` at `location_id`, from the first matching
    /// inventory record.
    pub fn machine_inventory(&self, size_id: &str, location_id: &str) -> i64 {
        self.machine_inventory
            .iter()
            .find(|i| i.size_id == size_id && i.location_id == location_id)
            .map_or(0, |i| i.number)
    }
}
