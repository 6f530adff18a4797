//! `hpegl_metal_available_resources`: the available-resources snapshot as
//! plain lists, with location, flavor and pool names resolved per entry.

use serde_json::{json, Value};

use super::{with_outputs, DataSource};
use crate::cache::location_label;
use crate::client::models::AvailableResources;
use crate::client::MetalClient;
use crate::error::ProviderError;
use crate::resources::volume::kib_to_gb;
use crate::schema::{Attribute, AttributeType, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_available_resources";

fn strings<'a>(names: &[&'a str]) -> Vec<(&'a str, AttributeType)> {
    names.iter().map(|n| (*n, AttributeType::String)).collect()
}

fn listing(fields: Vec<(&str, AttributeType)>) -> Attribute {
    Attribute::computed(AttributeType::object_list(fields))
}

fn locations(res: &AvailableResources) -> Vec<Value> {
    res.locations
        .iter()
        .map(|l| {
            json!({
                "id": l.id,
                "country": l.country,
                "region": l.region,
                "data_center": l.data_center,
                "location": location_label(l),
            })
        })
        .collect()
}

fn images(res: &AvailableResources) -> Vec<Value> {
    res.images
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "flavor": i.flavor,
                "version": i.version,
                "category": i.category,
            })
        })
        .collect()
}

fn ssh_keys(res: &AvailableResources) -> Vec<Value> {
    res.ssh_keys.iter().map(|k| json!({"id": k.id, "name": k.name})).collect()
}

fn networks(res: &AvailableResources) -> Vec<Value> {
    res.networks
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "name": n.name,
                "description": n.description,
                "host_use": n.host_use,
                "purpose": n.purpose,
                "location_id": n.location_id,
                "location": res.location_name(&n.location_id).unwrap_or_default(),
                "ip_pool_id": n.ip_pool_id,
                "vlan": n.vlan,
                "vni": n.vni,
            })
        })
        .collect()
}

/// Sizes with free machines; the first inventory record for a size decides
/// its quantity and location.
fn machine_sizes(res: &AvailableResources) -> Vec<Value> {
    res.machine_sizes
        .iter()
        .filter_map(|size| {
            let inventory = res.machine_inventory.iter().find(|i| i.size_id == size.id)?;
            (inventory.number > 0).then(|| {
                json!({
                    "id": size.id,
                    "name": size.name,
                    "description": size.details.banner1,
                    "location_id": inventory.location_id,
                    "location": res.location_name(&inventory.location_id).unwrap_or_default(),
                    "quantity": inventory.number,
                })
            })
        })
        .collect()
}

fn volume_flavors(res: &AvailableResources) -> Vec<Value> {
    res.volume_flavors
        .iter()
        .map(|f| json!({"id": f.id, "name": f.name, "description": f.details.banner1}))
        .collect()
}

fn volumes(res: &AvailableResources) -> Vec<Value> {
    res.volumes
        .iter()
        .map(|v| {
            json!({
                "id": v.id,
                "name": v.name,
                "description": v.description,
                "size": kib_to_gb(v.capacity),
                "location_id": v.location_id,
                "location": res.location_name(&v.location_id).unwrap_or_default(),
                "flavor_id": v.flavor_id,
                "flavor": res.volume_flavor_name(&v.flavor_id).unwrap_or_default(),
                "storage_pool_id": v.storage_pool_id,
                "storage_pool": res.storage_pool_name(&v.storage_pool_id).unwrap_or_default(),
            })
        })
        .collect()
}

fn storage_pools(res: &AvailableResources) -> Vec<Value> {
    res.storage_pools
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "location_id": p.location_id,
                "location": res.location_name(&p.location_id).unwrap_or_default(),
                "capacity": p.capacity,
            })
        })
        .collect()
}

fn volume_collections(res: &AvailableResources) -> Vec<Value> {
    res.volume_collections
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "location_id": c.location_id,
                "description": c.description,
            })
        })
        .collect()
}

/// `hpegl_metal_available_resources` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailableResourcesSource;

#[async_trait::async_trait]
impl DataSource for AvailableResourcesSource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let location_fields = ["location_id", "location"];
        let mut network =
            strings(&["id", "name", "description", "host_use", "purpose", "ip_pool_id"]);
        network.extend(strings(&location_fields));
        network.push(("vlan", AttributeType::Int64));
        network.push(("vni", AttributeType::Int64));

        let mut size = strings(&["id", "name", "description"]);
        size.extend(strings(&location_fields));
        size.push(("quantity", AttributeType::Int64));

        let mut volume = strings(&[
            "id",
            "name",
            "description",
            "flavor_id",
            "flavor",
            "storage_pool_id",
            "storage_pool",
        ]);
        volume.extend(strings(&location_fields));
        volume.push(("size", AttributeType::Float64));

        let mut pool = strings(&["id", "name"]);
        pool.extend(strings(&location_fields));
        pool.push(("capacity", AttributeType::Int64));

        Schema::v0()
            .with_description("Everything the current project may use.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "locations",
                listing(strings(&["id", "country", "region", "data_center", "location"])),
            )
            .with_attribute("images", listing(strings(&["id", "flavor", "version", "category"])))
            .with_attribute("ssh_keys", listing(strings(&["id", "name"])))
            .with_attribute("networks", listing(network))
            .with_attribute(
                "machine_sizes",
                listing(size).with_description("Machine sizes with at least one free machine."),
            )
            .with_attribute("volume_flavors", listing(strings(&["id", "name", "description"])))
            .with_attribute("volumes", listing(volume))
            .with_attribute(
                "storage_pools",
                listing(pool).with_description("Storage pools; capacity is in GiB."),
            )
            .with_attribute(
                "volume_collections",
                listing(strings(&["id", "name", "location_id", "description"])),
            )
    }

    async fn read(&self, client: &MetalClient, config: &Value) -> Result<Value, ProviderError> {
        let res = client.snapshot().await;
        Ok(with_outputs(
            config,
            json!({
                "id": "resources",
                "locations": locations(&res),
                "images": images(&res),
                "ssh_keys": ssh_keys(&res),
                "networks": networks(&res),
                "machine_sizes": machine_sizes(&res),
                "volume_flavors": volume_flavors(&res),
                "volumes": volumes(&res),
                "storage_pools": storage_pools(&res),
                "volume_collections": volume_collections(&res),
            }),
        ))
    }
}
