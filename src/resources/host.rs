//! `hpegl_metal_host`: a bare-metal machine.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{created_state, decode, difference, gone_if_missing, state_id, Resource};
use crate::client::models::{
    AvailableResources, Host, HostState, Network, NewHost, PowerState, Volume,
};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::poll::{poll_until, Probe};
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_host";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostConfig {
    name: String,
    description: String,
    image: String,
    machine_size: String,
    ssh: Vec<String>,
    networks: Vec<String>,
    network_route: String,
    network_untagged: String,
    allocated_ips: Vec<String>,
    location: String,
    user_data: String,
    volume_attachments: Vec<String>,
    labels: BTreeMap<String, String>,
}

/// Split `flavor@version`.
pub fn parse_image(image: &str) -> Result<(&str, &str), ProviderError> {
    let parts: Vec<&str> = image.split('@').collect();
    match parts.as_slice() {
        [flavor, version] => Ok((flavor, version)),
        _ => Err(ProviderError::Validation(format!(
            "image attribute {:?} must be in flavor@version format",
            image
        ))),
    }
}

/// ID of the service image `flavor@version`.
fn service_id(resources: &AvailableResources, image: &str) -> Result<String, ProviderError> {
    let (flavor, version) = parse_image(image)?;
    let pairs = || {
        resources
            .images
            .iter()
            .map(|i| format!("{}@{}", i.flavor, i.version))
    };

    let mut same_flavor = resources.images.iter().filter(|i| i.flavor == flavor).peekable();
    if same_flavor.peek().is_none() {
        return Err(ProviderError::not_found("image flavor", flavor, pairs()));
    }
    same_flavor
        .find(|i| i.version == version)
        .map(|i| i.id.clone())
        .ok_or_else(|| ProviderError::not_found("image version", image, pairs()))
}

/// Networks of one location, addressable by ID or by unique name.
struct LocationNetworks<'a> {
    location: String,
    networks: Vec<&'a Network>,
}

impl<'a> LocationNetworks<'a> {
    fn new(resources: &'a AvailableResources, location_id: &str) -> Self {
        let location = resources
            .location_name(location_id)
            .unwrap_or_else(|_| location_id.to_string());
        Self {
            location,
            networks: resources.networks_in(location_id),
        }
    }

    fn resolve(&self, key: &str) -> Result<&'a Network, ProviderError> {
        if let Some(net) = self.networks.iter().copied().find(|n| n.id == key) {
            return Ok(net);
        }
        let mut named = self.networks.iter().copied().filter(|n| n.name == key);
        match (named.next(), named.next()) {
            (Some(net), None) => Ok(net),
            (Some(_), Some(_)) => Err(ProviderError::Ambiguous {
                kind: "network",
                name: key.to_string(),
                scope: format!("location {:?}", self.location),
            }),
            _ => Err(ProviderError::not_found(
                "network",
                key,
                self.networks.iter().map(|n| n.name.clone()),
            )),
        }
    }

    /// Resolve `key` and require it to be one of `selected`.
    fn resolve_selected(
        &self,
        what: &str,
        key: &str,
        selected: &[String],
    ) -> Result<String, ProviderError> {
        let id = self.resolve(key)?.id.clone();
        if !selected.contains(&id) {
            return Err(ProviderError::Validation(format!(
                "network for {} {} must be one of the selected networks",
                what, key
            )));
        }
        Ok(id)
    }
}

fn build_new_host(
    cfg: &HostConfig,
    resources: &AvailableResources,
) -> Result<NewHost, ProviderError> {
    let service_id = service_id(resources, &cfg.image)?;

    let machine_size_id = resources
        .machine_sizes
        .iter()
        .find(|s| s.name == cfg.machine_size || s.id == cfg.machine_size)
        .map(|s| s.id.clone())
        .ok_or_else(|| {
            ProviderError::not_found(
                "machine size",
                &cfg.machine_size,
                resources.machine_sizes.iter().map(|s| s.name.clone()),
            )
        })?;

    let ssh_key_ids = cfg
        .ssh
        .iter()
        .map(|key| {
            resources
                .ssh_keys
                .iter()
                .find(|k| &k.name == key || &k.id == key)
                .map(|k| k.id.clone())
                .ok_or_else(|| {
                    let names = resources.ssh_keys.iter().map(|k| k.name.clone());
                    ProviderError::not_found("SSH key", key, names)
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let location_id = resources.location_id(&cfg.location)?;
    let networks = LocationNetworks::new(resources, &location_id);
    let network_ids = cfg
        .networks
        .iter()
        .map(|n| networks.resolve(n).map(|net| net.id.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    if network_ids.is_empty() {
        return Err(ProviderError::Validation("at least one network must be specified".to_string()));
    }

    let network_for_default_route = if cfg.network_route.is_empty() {
        network_ids[0].clone()
    } else {
        networks.resolve_selected("default route", &cfg.network_route, &network_ids)?
    };
    let network_untagged = if cfg.network_untagged.is_empty() {
        String::new()
    } else {
        networks.resolve_selected("untagged", &cfg.network_untagged, &network_ids)?
    };

    let volume_ids = cfg
        .volume_attachments
        .iter()
        .map(|key| {
            resources
                .volumes
                .iter()
                .find(|v| &v.id == key || &v.name == key)
                .map(|v| v.id.clone())
                .ok_or_else(|| {
                    ProviderError::Validation(format!(
                        "volume attachment failed due to volume {:?} does not exist",
                        key
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NewHost {
        name: cfg.name.clone(),
        description: cfg.description.clone(),
        location_id,
        service_id,
        machine_size_id,
        ssh_key_ids,
        network_ids,
        network_for_default_route,
        network_untagged,
        pre_allocated_ips: cfg.allocated_ips.clone(),
        volume_ids,
        user_data: cfg.user_data.clone(),
        labels: cfg.labels.clone(),
    })
}

/// Resolve attachment names or IDs against the live volume list.
fn resolve_volumes(keys: &[String], volumes: &[Volume]) -> Result<Vec<String>, ProviderError> {
    keys.iter()
        .map(|key| {
            volumes
                .iter()
                .find(|v| &v.id == key || &v.name == key)
                .map(|v| v.id.clone())
                .ok_or_else(|| {
                    ProviderError::Validation(format!(
                        "volume attachment failed due to volume {:?} does not exist",
                        key
                    ))
                })
        })
        .collect()
}

/// Merge the portal's view of `host` into `prior`, keeping user inputs the
/// portal does not echo back.
fn host_state(
    prior: &Value,
    host: &Host,
    resources: &AvailableResources,
    volume_infos: Vec<Value>,
) -> Value {
    let mut state: Map<String, Value> = prior.as_object().cloned().unwrap_or_default();

    let mut connections = Map::new();
    let mut subnets = Map::new();
    let mut gateways = Map::new();
    let mut vlans = Map::new();
    for net in host.connections.iter().flat_map(|c| &c.networks) {
        connections.insert(net.name.clone(), json!(net.ip));
        subnets.insert(net.name.clone(), json!(net.subnet));
        gateways.insert(net.name.clone(), json!(net.gateway));
        vlans.insert(net.name.clone(), json!(net.vlan.to_string()));
    }

    let location = resources.location_name(&host.location_id).unwrap_or_default();
    let fields = json!({
        "id": host.id,
        "name": host.name,
        "description": host.description,
        "image": format!("{}@{}", host.service_flavor, host.service_version),
        "machine_size": host.machine_size_name,
        "machine_size_id": host.machine_size_id,
        "ssh_ids": host.ssh_authorized_keys,
        "location": location,
        "location_id": host.location_id,
        "network_ids": host.network_ids,
        "network_route_id": host.network_for_default_route,
        "network_untagged_id": host.network_untagged,
        "user_data": host.user_data,
        "labels": host.labels,
        "connections": connections,
        "connections_subnet": subnets,
        "connections_gateway": gateways,
        "connections_vlan": vlans,
        "chap_user": host.iscsi_config.chap_user,
        "chap_secret": host.iscsi_config.chap_secret,
        "initiator_name": host.iscsi_config.initiator_name,
        "volume_infos": volume_infos,
        "state": host.state.as_str(),
        "sub_state": host.substate,
        "portal_comm_okay": host.portal_comm_okay,
        "power_state": host.power_status.as_str(),
    });
    if let Value::Object(fields) = fields {
        state.extend(fields);
    }

    let name_of = |id: &str| resources.network_name(id).map(String::from);
    for (attr, id) in [
        ("network_route", &host.network_for_default_route),
        ("network_untagged", &host.network_untagged),
    ] {
        let unset = state.get(attr).and_then(Value::as_str).unwrap_or_default().is_empty();
        if unset && !id.is_empty() {
            state.insert(attr.to_string(), json!(name_of(id).unwrap_or_else(|| id.clone())));
        }
    }

    Value::Object(state)
}

/// `hpegl_metal_host` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostResource;

impl HostResource {
    async fn fetch(
        &self,
        client: &MetalClient,
        prior: &Value,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let Some(host) = gone_if_missing(client.api.get_host(id).await)? else {
            return Ok(None);
        };

        let attachments = client.api.list_volume_attachments().await?;
        let volume_infos = attachments
            .iter()
            .filter(|a| a.host_id == host.id)
            .map(|a| {
                json!({
                    "id": a.volume_id,
                    "name": a.name,
                    "discovery_ip": a.volume_target_ip_address,
                    "target_iqn": a.volume_target_iqn,
                })
            })
            .collect();

        let resources = client.snapshot().await;
        Ok(Some(host_state(prior, &host, &resources, volume_infos)))
    }

    async fn power_off(&self, client: &MetalClient, id: &str) -> Result<(), ProviderError> {
        client.api.power_off_host(id).await?;
        let limit = client.poll.until_deleted();
        poll_until(client.poll.interval, limit, "host power off", move || async move {
            let host = client.api.get_host(id).await?;
            match (host.state, host.power_status) {
                (HostState::Failed, _) => {
                    Err(ProviderError::Failed("failed to turn off host power".to_string()))
                },
                (_, PowerState::Off) => Ok(Probe::Done(())),
                _ => Ok(Probe::Pending),
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl Resource for HostResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let volume_info = AttributeType::object_list([
            ("id", AttributeType::String),
            ("name", AttributeType::String),
            ("discovery_ip", AttributeType::String),
            ("target_iqn", AttributeType::String),
        ]);

        Schema::v0()
            .with_description("A bare-metal host.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .force_new()
                    .with_description("Friendly name; becomes the lower-cased OS hostname."),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "image",
                Attribute::required_string()
                    .force_new()
                    .with_description("OS image as flavor@version, e.g. ubuntu@22.04."),
            )
            .with_attribute("machine_size", Attribute::required_string().force_new())
            .with_attribute("machine_size_id", Attribute::computed_string())
            .with_attribute("ssh", Attribute::required(AttributeType::string_list()).force_new())
            .with_attribute("ssh_ids", Attribute::computed(AttributeType::string_list()))
            .with_attribute(
                "networks",
                Attribute::required(AttributeType::string_list())
                    .force_new()
                    .with_description("Network names or IDs in the host's location."),
            )
            .with_attribute("network_ids", Attribute::computed(AttributeType::string_list()))
            .with_attribute("network_route", Attribute::optional_computed(AttributeType::String))
            .with_attribute("network_route_id", Attribute::computed_string())
            .with_attribute("network_untagged", Attribute::optional_computed(AttributeType::String))
            .with_attribute("network_untagged_id", Attribute::computed_string())
            .with_attribute(
                "allocated_ips",
                Attribute::optional(AttributeType::string_list())
                    .force_new()
                    .with_description("Pre-allocated IPs, one per entry of networks."),
            )
            .with_attribute(
                "location",
                Attribute::required_string()
                    .force_new()
                    .with_description("country:region:data-center"),
            )
            .with_attribute("location_id", Attribute::computed_string())
            .with_attribute("user_data", Attribute::optional_string().force_new())
            .with_attribute("volume_attachments", Attribute::optional(AttributeType::string_list()))
            .with_attribute("labels", Attribute::optional(AttributeType::string_map()).force_new())
            .with_attribute("connections", Attribute::computed(AttributeType::string_map()))
            .with_attribute("connections_subnet", Attribute::computed(AttributeType::string_map()))
            .with_attribute("connections_gateway", Attribute::computed(AttributeType::string_map()))
            .with_attribute("connections_vlan", Attribute::computed(AttributeType::string_map()))
            .with_attribute("chap_user", Attribute::computed_string())
            .with_attribute("chap_secret", Attribute::computed_string().sensitive())
            .with_attribute("initiator_name", Attribute::computed_string())
            .with_attribute("volume_infos", Attribute::computed(volume_info))
            .with_attribute("state", Attribute::computed_string())
            .with_attribute("sub_state", Attribute::computed_string())
            .with_attribute("portal_comm_okay", Attribute::computed_bool())
            .with_attribute("power_state", Attribute::computed_string())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        match config.get("image").and_then(Value::as_str) {
            Some(image) => match parse_image(image) {
                Ok(_) => Vec::new(),
                Err(e) => vec![Diagnostic::error(e.message()).with_attribute("image")],
            },
            None => Vec::new(),
        }
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: HostConfig = decode(planned)?;
        let action = format!("create host {}", cfg.name);

        let resources = client.snapshot().await;
        let new = build_new_host(&cfg, &resources).during(&action)?;
        let host = client.api.add_host(&new).await.during(&action)?;
        info!(resource_type = TYPE_NAME, id = %host.id, "Created host");

        self.fetch(client, planned, &host.id)
            .await
            .and_then(|state| {
                state.ok_or_else(|| {
                    ProviderError::Failed(format!("host {} disappeared after create", host.id))
                })
            })
            .during(&action)
            .keep_state(|| created_state(planned, &host.id))
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        self.fetch(client, state, &id).await.during(format!("query host {}", id))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let action = format!("update host {}", id);
        let cfg: HostConfig = decode(planned)?;
        let before: HostConfig = decode(prior)?;

        let mut host = client.api.get_host(&id).await.during(&action)?;
        let volumes = client.api.list_volumes().await.during(&action)?;
        let attachments = client.api.list_volume_attachments().await.during(&action)?;

        let desired = resolve_volumes(&cfg.volume_attachments, &volumes).during(&action)?;
        let existing: Vec<String> = attachments
            .iter()
            .filter(|a| a.host_id == host.id)
            .map(|a| a.volume_id.clone())
            .collect();

        for volume_id in difference(&existing, &desired) {
            debug!(host = %id, volume = %volume_id, "Detaching volume");
            client.api.detach_volume(&volume_id, &host.id).await.during(&action)?;
        }
        for volume_id in difference(&desired, &existing) {
            debug!(host = %id, volume = %volume_id, "Attaching volume");
            client.api.attach_volume(&volume_id, &host.id).await.during(&action)?;
        }

        let route_changed = cfg.network_route != before.network_route;
        let untagged_changed = cfg.network_untagged != before.network_untagged;
        if route_changed || untagged_changed || cfg.description != before.description {
            let resources = client.snapshot().await;
            let networks = LocationNetworks::new(&resources, &host.location_id);
            if route_changed && !cfg.network_route.is_empty() {
                host.network_for_default_route = networks
                    .resolve_selected("default route", &cfg.network_route, &host.network_ids)
                    .during(&action)?;
            }
            if untagged_changed {
                host.network_untagged = if cfg.network_untagged.is_empty() {
                    String::new()
                } else {
                    networks
                        .resolve_selected("untagged", &cfg.network_untagged, &host.network_ids)
                        .during(&action)?
                };
            }
            host.description = cfg.description.clone();
            client.api.update_host(&host).await.during(&action)?;
        }
        info!(resource_type = TYPE_NAME, id = %id, "Updated host");

        self.fetch(client, planned, &id)
            .await
            .during(&action)?
            .ok_or_else(|| ProviderError::Failed(format!("host {} disappeared during update", id)))
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        let action = format!("delete host {}", id);

        let host = client.api.get_host(&id).await.during(&action)?;
        if host.state == HostState::Deleted {
            return Ok(());
        }

        if host.state == HostState::Ready && host.power_status == PowerState::On {
            info!(resource_type = TYPE_NAME, id = %id, "Powering off host before delete");
            self.power_off(client, &id).await.during(&action)?;
        }

        client.api.delete_host(&id).await.during(&action)?;
        let host_id = id.as_str();
        let limit = client.poll.until_deleted();
        poll_until(client.poll.interval, limit, "host delete", move || async move {
            let host = client.api.get_host(host_id).await?;
            match host.state {
                HostState::Deleted => Ok(Probe::Done(())),
                HostState::Failed => {
                    Err(ProviderError::Failed("unable to delete host".to_string()))
                },
                _ => Ok(Probe::Pending),
            }
        })
        .await
        .during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted host");

        client.refresh_after_delete(TYPE_NAME).await;
        Ok(())
    }
}
