//! `hpegl_metal_volume`: block storage.
//!
//! Sizes are configured in GB and sent to the portal as KiB of GiB-rounded
//! capacity; [`gb_to_kib`] and [`kib_to_gb`] convert between the two.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{created_state, decode, gone_if_missing, state_id, Resource};
use crate::client::models::{
    AvailableResources, NewVolume, UpdateVolume, Volume, VolumeState, VolumeSubState,
};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::poll::{poll_until, Probe};
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_volume";

/// GiB in one GB.
const GIB_PER_GB: f64 = 0.931323;

/// Capacity in KiB for a size in GB.
pub fn gb_to_kib(gb: f64) -> i64 {
    (gb * GIB_PER_GB * 1024.0 * 1024.0).round() as i64
}

/// Size in GB, to two decimals, for a capacity in KiB.
pub fn kib_to_gb(kib: i64) -> f64 {
    let gb = kib as f64 / 1024.0 / 1024.0 / GIB_PER_GB;
    (gb * 100.0).round() / 100.0
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VolumeConfig {
    name: String,
    description: String,
    flavor: String,
    size: f64,
    location: String,
    shareable: bool,
    storage_pool: String,
    volume_collection: String,
    labels: BTreeMap<String, String>,
}

fn build_new_volume(
    cfg: &VolumeConfig,
    resources: &AvailableResources,
) -> Result<NewVolume, ProviderError> {
    let storage_pool_id = if cfg.storage_pool.is_empty() {
        String::new()
    } else {
        resources.storage_pool_id(&cfg.storage_pool)?
    };

    Ok(NewVolume {
        name: cfg.name.clone(),
        description: cfg.description.clone(),
        location_id: resources.location_id(&cfg.location)?,
        flavor_id: resources.volume_flavor_id(&cfg.flavor)?,
        storage_pool_id,
        volume_collection_id: resources.volume_collection_id(&cfg.volume_collection)?,
        capacity: gb_to_kib(cfg.size),
        shareable: cfg.shareable,
        labels: cfg.labels.clone(),
    })
}

fn volume_state(prior: &Value, volume: &Volume, resources: &AvailableResources) -> Value {
    let mut state: Map<String, Value> = prior.as_object().cloned().unwrap_or_default();

    // Names fall back to whatever the user wrote when the snapshot lacks them.
    let keep = |attr: &str| {
        state
            .get(attr)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let flavor = resources
        .volume_flavor_name(&volume.flavor_id)
        .unwrap_or_else(|_| keep("flavor"));
    let storage_pool = if volume.storage_pool_id.is_empty() {
        String::new()
    } else {
        resources
            .storage_pool_name(&volume.storage_pool_id)
            .unwrap_or_else(|_| keep("storage_pool"))
    };
    let volume_collection = resources
        .volume_collection_name(&volume.volume_collection_id)
        .unwrap_or_else(|_| keep("volume_collection"));
    let location = resources
        .location_name(&volume.location_id)
        .unwrap_or_else(|_| keep("location"));

    let fields = json!({
        "id": volume.id,
        "name": volume.name,
        "description": volume.description,
        "size": kib_to_gb(volume.capacity),
        "flavor": flavor,
        "flavor_id": volume.flavor_id,
        "location": location,
        "location_id": volume.location_id,
        "shareable": volume.shareable,
        "storage_pool": storage_pool,
        "storage_pool_id": volume.storage_pool_id,
        "volume_collection": volume_collection,
        "volume_collection_id": volume.volume_collection_id,
        "labels": volume.labels,
        "state": volume.state.as_str(),
        "status": volume.status,
        "sub_state": volume.sub_state.as_str(),
        "wwn": volume.wwn,
        "export_count": volume.export_count,
        "replication": volume.replication,
        "active_site": volume.active_site,
        "created_site": volume.created_site,
    });
    if let Value::Object(fields) = fields {
        state.extend(fields);
    }
    Value::Object(state)
}

/// `hpegl_metal_volume` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeResource;

impl VolumeResource {
    /// Wait for a new volume to leave allocation, then read it back.
    async fn settle(
        &self,
        client: &MetalClient,
        planned: &Value,
        id: &str,
    ) -> Result<Value, ProviderError> {
        let limit = client.poll.bounded();
        poll_until(client.poll.interval, limit, "volume allocation", move || async move {
            let volume = client.api.get_volume(id).await?;
            Ok(match volume.state {
                VolumeState::New | VolumeState::Allocating => Probe::Pending,
                _ => Probe::Done(()),
            })
        })
        .await?;

        client.refresh().await?;
        self.fetch(client, planned, id)
            .await?
            .ok_or_else(|| ProviderError::Failed(format!("volume {} disappeared after create", id)))
    }

    async fn fetch(
        &self,
        client: &MetalClient,
        prior: &Value,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let Some(volume) = gone_if_missing(client.api.get_volume(id).await)? else {
            return Ok(None);
        };
        let resources = client.snapshot().await;
        Ok(Some(volume_state(prior, &volume, &resources)))
    }

    /// Remove every attachment of a visible volume and wait for it to go
    /// back to unexported.
    async fn detach_all(&self, client: &MetalClient, id: &str) -> Result<(), ProviderError> {
        let attachments = client.api.list_volume_attachments().await?;
        for attachment in attachments.iter().filter(|a| a.volume_id == id) {
            debug!(volume = %id, attachment = %attachment.id, "Removing volume attachment");
            client.api.delete_volume_attachment(&attachment.id).await?;
        }

        let limit = client.poll.bounded();
        poll_until(client.poll.interval, limit, "volume state change", move || async move {
            let volume = client.api.get_volume(id).await?;
            Ok(if volume.state == VolumeState::Visible {
                Probe::Pending
            } else {
                Probe::Done(())
            })
        })
        .await
    }
}

#[async_trait::async_trait]
impl Resource for VolumeResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A block storage volume.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().force_new())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "flavor",
                Attribute::required_string()
                    .force_new()
                    .with_description("Volume flavor name or ID."),
            )
            .with_attribute("flavor_id", Attribute::computed_string())
            .with_attribute(
                "size",
                Attribute::required(AttributeType::Float64).with_description("Minimum size in GB."),
            )
            .with_attribute("location", Attribute::required_string().force_new())
            .with_attribute("location_id", Attribute::computed_string())
            .with_attribute(
                "shareable",
                Attribute::optional_bool().force_new().with_default(json!(false)),
            )
            .with_attribute(
                "storage_pool",
                Attribute::optional_computed(AttributeType::String).force_new(),
            )
            .with_attribute("storage_pool_id", Attribute::computed_string())
            .with_attribute(
                "volume_collection",
                Attribute::optional_computed(AttributeType::String).force_new(),
            )
            .with_attribute("volume_collection_id", Attribute::computed_string())
            .with_attribute("labels", Attribute::optional(AttributeType::string_map()))
            .with_attribute("state", Attribute::computed_string())
            .with_attribute("status", Attribute::computed_string())
            .with_attribute("sub_state", Attribute::computed_string())
            .with_attribute("wwn", Attribute::computed_string())
            .with_attribute("export_count", Attribute::computed_int64())
            .with_attribute("replication", Attribute::computed_bool())
            .with_attribute("active_site", Attribute::computed_string())
            .with_attribute("created_site", Attribute::computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        match config.get("size").and_then(Value::as_f64) {
            Some(size) if size <= 0.0 => {
                let message = format!("\"size\" must be greater than 0, got {}", size);
                vec![Diagnostic::error(message).with_attribute("size")]
            },
            _ => Vec::new(),
        }
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: VolumeConfig = decode(planned)?;
        let action = format!("create volume {}", cfg.name);

        let resources = client.snapshot().await;
        let new = build_new_volume(&cfg, &resources).during(&action)?;
        let volume = client.api.add_volume(&new).await.during(&action)?;
        info!(
            resource_type = TYPE_NAME,
            id = %volume.id,
            capacity = new.capacity,
            "Created volume"
        );

        self.settle(client, planned, &volume.id)
            .await
            .during(&action)
            .keep_state(|| created_state(planned, &volume.id))
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        self.fetch(client, state, &id).await.during(format!("read volume {}", id))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let action = format!("update volume {}", id);
        let cfg: VolumeConfig = decode(planned)?;

        let current = client.api.get_volume(&id).await.during(&action)?;
        let update = UpdateVolume {
            id: id.clone(),
            description: cfg.description.clone(),
            capacity: gb_to_kib(cfg.size),
            labels: cfg.labels.clone(),
            etag: current.etag,
        };
        client.api.update_volume(&update).await.during(&action)?;

        let volume_id = id.as_str();
        let limit = client.poll.bounded();
        poll_until(client.poll.interval, limit, "volume update", move || async move {
            let volume = client.api.get_volume(volume_id).await?;
            match volume.sub_state {
                VolumeSubState::UpdateRequested | VolumeSubState::Updating => Ok(Probe::Pending),
                VolumeSubState::UpdateFailed => {
                    Err(ProviderError::Failed("volume update failed".to_string()))
                },
                _ => Ok(Probe::Done(())),
            }
        })
        .await
        .during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, capacity = update.capacity, "Updated volume");

        client.refresh().await.during(&action)?;
        self.fetch(client, planned, &id)
            .await
            .during(&action)?
            .ok_or_else(|| {
                ProviderError::Failed(format!("volume {} disappeared during update", id))
            })
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        let action = format!("delete volume {}", id);

        let volume = client.api.get_volume(&id).await.during(&action)?;
        match volume.state {
            VolumeState::Deleted => return Ok(()),
            VolumeState::Visible => self.detach_all(client, &id).await.during(&action)?,
            _ => {},
        }

        client.api.delete_volume(&id).await.during(&action)?;
        let volume_id = id.as_str();
        let limit = client.poll.until_deleted();
        poll_until(client.poll.interval, limit, "volume delete", move || async move {
            let volume = client.api.get_volume(volume_id).await?;
            match volume.state {
                VolumeState::Deleted => Ok(Probe::Done(())),
                VolumeState::Failed => {
                    Err(ProviderError::Failed("unable to delete volume".to_string()))
                },
                _ => Ok(Probe::Pending),
            }
        })
        .await
        .during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted volume");

        client.refresh_after_delete(TYPE_NAME).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;
    use crate::client::models::VolumeAttachment;
    use crate::testing::FakeMetal;

    fn config() -> Value {
        json!({
            "name": "data",
            "flavor": "Fast",
            "size": 10.0,
            "location": "USA:Central:V2DCC01",
            "storage_pool": "Pool A",
            "labels": {"tier": "gold"},
        })
    }

    #[test]
    fn test_capacity_conversion() {
        assert_eq!(gb_to_kib(10.0), 9_765_623);
        assert_eq!(kib_to_gb(9_765_623), 10.0);
        assert_eq!(kib_to_gb(9_765_625), 10.0);
        assert_eq!(gb_to_kib(0.0), 0);
    }

    #[test]
    fn test_capacity_round_trip_within_a_hundredth() {
        for gb in [1.0, 2.5, 10.0, 100.0, 1024.0, 3.75] {
            let back = kib_to_gb(gb_to_kib(gb));
            assert!((back - gb).abs() <= 0.01, "{} came back as {}", gb, back);
        }
    }

    #[test]
    fn test_build_new_volume() {
        let cfg: VolumeConfig = decode(&config()).unwrap();
        let new = build_new_volume(&cfg, &sample()).unwrap();
        assert_eq!(new.flavor_id, "vf-fast");
        assert_eq!(new.storage_pool_id, "pool-1");
        assert_eq!(new.location_id, "loc-1");
        assert!(new.volume_collection_id.is_empty());
        assert_eq!(new.capacity, 9_765_623);
    }

    #[test]
    fn test_build_new_volume_unknown_flavor() {
        let mut doc = config();
        doc["flavor"] = json!("Slow");
        let cfg: VolumeConfig = decode(&doc).unwrap();
        assert!(matches!(
            build_new_volume(&cfg, &sample()).unwrap_err(),
            ProviderError::NotFound { kind: "volume flavor", .. }
        ));
    }

    #[test]
    fn test_validate_size() {
        assert!(VolumeResource.validate(&config()).is_empty());
        let diags = VolumeResource.validate(&json!({"size": 0.0}));
        assert_eq!(diags[0].summary, "\"size\" must be greater than 0, got 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_allocation() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);

        let state = VolumeResource.create(&client, &config()).await.unwrap();
        assert_eq!(state["state"], "allocated");
        assert_eq!(state["size"], 10.0);
        assert_eq!(state["flavor"], "Fast");
        assert_eq!(state["storage_pool"], "Pool A");
        assert_eq!(state["location"], "USA:Central:V2DCC01");
        assert_eq!(fake.calls_to("available_resources").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_after_create_keeps_id() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        fake.state().resources_unavailable = true;

        let err = VolumeResource.create(&client, &config()).await.unwrap_err();
        assert_eq!(err.message(), "portal is busy");
        let kept = err.partial_state().unwrap().clone();
        assert_eq!(kept["id"], "vol-1");
        assert_eq!(kept["name"], "data");

        // The kept state is enough to destroy the volume.
        VolumeResource.delete(&client, &kept).await.unwrap();
        assert_eq!(fake.state().volumes["vol-1"].state, VolumeState::Deleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_sends_etag_and_waits() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        let prior = VolumeResource.create(&client, &config()).await.unwrap();
        let mut planned = prior.clone();
        planned["size"] = json!(20.0);

        let state = VolumeResource.update(&client, &prior, &planned).await.unwrap();
        assert_eq!(state["size"], 20.0);
        let sent = fake.state().last_volume_update.clone().unwrap();
        assert_eq!(sent.etag, "etag-1");
        assert_eq!(sent.capacity, gb_to_kib(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_times_out() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(3);
        let prior = VolumeResource.create(&client, &config()).await.unwrap();
        fake.state().volume_update_stuck = true;

        let err = VolumeResource.update(&client, &prior, &prior).await.unwrap_err();
        assert_eq!(err.message(), "waiting for volume update has timed out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_visible_removes_attachments_first() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        let state = VolumeResource.create(&client, &config()).await.unwrap();
        {
            let mut st = fake.state();
            st.volumes.get_mut("vol-1").unwrap().state = VolumeState::Visible;
            for host in ["host-a", "host-b"] {
                st.attachments.push(VolumeAttachment {
                    id: format!("va-{}", host),
                    host_id: host.into(),
                    volume_id: "vol-1".into(),
                    ..Default::default()
                });
            }
        }

        VolumeResource.delete(&client, &state).await.unwrap();

        let first_detach = fake.position("delete_volume_attachment va-host-a").unwrap();
        let second_detach = fake.position("delete_volume_attachment va-host-b").unwrap();
        let delete = fake.position("delete_volume vol-1").unwrap();
        assert!(first_detach < delete && second_detach < delete);
        assert!(fake.state().attachments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stuck_visible_times_out() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(3);
        let state = VolumeResource.create(&client, &config()).await.unwrap();
        {
            let mut st = fake.state();
            st.volumes.get_mut("vol-1").unwrap().state = VolumeState::Visible;
            st.volume_stays_visible = true;
        }

        let err = VolumeResource.delete(&client, &state).await.unwrap_err();
        assert_eq!(err.message(), "waiting for volume state change has timed out");
        assert!(fake.calls_to("delete_volume").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        let state = VolumeResource.create(&client, &config()).await.unwrap();
        fake.state().volume_delete_fails = true;

        let err = VolumeResource.delete(&client, &state).await.unwrap_err();
        assert_eq!(err.message(), "unable to delete volume");
        assert!(err.to_string().starts_with("failed to delete volume vol-1"));
    }

    #[tokio::test]
    async fn test_read_missing_volume() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        assert!(VolumeResource.read(&client, &json!({"id": "vol-7"})).await.unwrap().is_none());
    }
}
