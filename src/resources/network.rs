//! `hpegl_metal_network`: a project network, optionally with its own IP pool.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{created_state, decode, gone_if_missing, single_block, state_id, Resource};
use crate::client::models::{IpSource, Network, NewIpPool, NewNetwork};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_network";

const HOST_USES: [&str; 3] = ["Required", "Optional", "Default"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkConfig {
    name: String,
    description: String,
    location: String,
    host_use: String,
    purpose: String,
    #[serde(deserialize_with = "single_block")]
    ip_pool: Option<IpPoolConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpPoolConfig {
    name: String,
    description: String,
    ip_ver: String,
    base_ip: String,
    netmask: String,
    default_route: String,
    sources: Vec<SourceConfig>,
    dns: Vec<String>,
    proxy: String,
    no_proxy: String,
    ntp: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceConfig {
    base_ip: String,
    count: i64,
}

impl From<IpPoolConfig> for NewIpPool {
    fn from(pool: IpPoolConfig) -> Self {
        Self {
            name: pool.name,
            description: pool.description,
            ip_version: pool.ip_ver,
            base_ip: pool.base_ip,
            netmask: pool.netmask,
            default_route: pool.default_route,
            sources: pool
                .sources
                .into_iter()
                .map(|s| IpSource {
                    base_ip: s.base_ip,
                    count: s.count,
                })
                .collect(),
            dns: pool.dns,
            proxy: pool.proxy,
            no_proxy: pool.no_proxy,
            ntp: pool.ntp,
        }
    }
}

fn ip_pool_block() -> Block {
    Block::new()
        .with_description("IP pool created together with the network.")
        .with_attribute("name", Attribute::required_string())
        .with_attribute("description", Attribute::optional_string())
        .with_attribute(
            "ip_ver",
            Attribute::required_string().with_description("IPv4 or IPv6."),
        )
        .with_attribute("base_ip", Attribute::required_string())
        .with_attribute("netmask", Attribute::required_string())
        .with_attribute("default_route", Attribute::optional_string())
        .with_attribute(
            "sources",
            Attribute::optional(AttributeType::object_list([
                ("base_ip", AttributeType::String),
                ("count", AttributeType::Int64),
            ]))
            .with_description("Ranges inside base_ip/netmask handed out by the pool."),
        )
        .with_attribute("dns", Attribute::optional(AttributeType::string_list()))
        .with_attribute("proxy", Attribute::optional_string())
        .with_attribute("no_proxy", Attribute::optional_string())
        .with_attribute("ntp", Attribute::optional(AttributeType::string_list()))
}

fn network_state(prior: &Value, network: &Network, location: String) -> Value {
    let mut state: Map<String, Value> = prior.as_object().cloned().unwrap_or_default();
    let fields = json!({
        "id": network.id,
        "name": network.name,
        "description": network.description,
        "location": location,
        "location_id": network.location_id,
        "host_use": network.host_use,
        "purpose": network.purpose,
        "kind": network.kind,
        "ip_pool_id": network.ip_pool_id,
    });
    if let Value::Object(fields) = fields {
        state.extend(fields);
    }
    Value::Object(state)
}

/// `hpegl_metal_network` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkResource;

impl NetworkResource {
    /// Reload the snapshot so hosts can find the new network, then read it back.
    async fn settle(
        &self,
        client: &MetalClient,
        planned: &Value,
        id: &str,
    ) -> Result<Value, ProviderError> {
        client.refresh().await?;
        self.fetch(client, planned, id)
            .await?
            .ok_or_else(|| {
                ProviderError::Failed(format!("network {} disappeared after create", id))
            })
    }

    async fn fetch(
        &self,
        client: &MetalClient,
        prior: &Value,
        id: &str,
    ) -> Result<Option<Value>, ProviderError> {
        let Some(network) = gone_if_missing(client.api.get_network(id).await)? else {
            return Ok(None);
        };
        let location = client
            .snapshot()
            .await
            .location_name(&network.location_id)
            .unwrap_or_default();
        Ok(Some(network_state(prior, &network, location)))
    }
}

#[async_trait::async_trait]
impl Resource for NetworkResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A network in one location.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "location",
                Attribute::required_string()
                    .force_new()
                    .with_description("country:region:data-center"),
            )
            .with_attribute("location_id", Attribute::computed_string())
            .with_attribute(
                "host_use",
                Attribute::optional_computed(AttributeType::String)
                    .with_description("Required, Optional or Default."),
            )
            .with_attribute(
                "purpose",
                Attribute::optional_computed(AttributeType::String).force_new(),
            )
            .with_attribute("kind", Attribute::computed_string())
            .with_attribute("ip_pool_id", Attribute::computed_string())
            .with_block(
                "ip_pool",
                NestedBlock::list(ip_pool_block()).with_max_items(1).force_new(),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diags = Vec::new();

        if let Some(host_use) = config.get("host_use").and_then(Value::as_str) {
            if !host_use.is_empty() && !HOST_USES.contains(&host_use) {
                let message =
                    format!("host_use must be one of {:?}, got {:?}", HOST_USES, host_use);
                diags.push(Diagnostic::error(message).with_attribute("host_use"));
            }
        }

        let cfg: NetworkConfig = match decode(config) {
            Ok(cfg) => cfg,
            Err(e) => return vec![Diagnostic::from(&e)],
        };
        for source in cfg.ip_pool.iter().flat_map(|p| &p.sources) {
            if source.count <= 0 {
                let message = format!("\"count\" must be greater than 0, got {}", source.count);
                diags.push(Diagnostic::error(message).with_attribute("ip_pool.sources.count"));
            }
        }
        diags
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: NetworkConfig = decode(planned)?;
        let action = format!("create network {}", cfg.name);

        let location_id = client.snapshot().await.location_id(&cfg.location).during(&action)?;
        let new = NewNetwork {
            name: cfg.name,
            description: cfg.description,
            location_id,
            host_use: cfg.host_use,
            purpose: cfg.purpose,
            new_ip_pool: cfg.ip_pool.map(NewIpPool::from),
        };
        let network = client.api.add_network(&new).await.during(&action)?;
        info!(
            resource_type = TYPE_NAME,
            id = %network.id,
            pool = %network.ip_pool_id,
            "Created network"
        );

        self.settle(client, planned, &network.id)
            .await
            .during(&action)
            .keep_state(|| created_state(planned, &network.id))
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        self.fetch(client, state, &id).await.during(format!("read network {}", id))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let action = format!("update network {}", id);
        let cfg: NetworkConfig = decode(planned)?;

        let mut network = client.api.get_network(&id).await.during(&action)?;
        network.name = cfg.name;
        network.description = cfg.description;
        if !cfg.host_use.is_empty() {
            network.host_use = cfg.host_use;
        }
        client.api.update_network(&network).await.during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Updated network");

        self.fetch(client, planned, &id)
            .await
            .during(&action)?
            .ok_or_else(|| {
                ProviderError::Failed(format!("network {} disappeared during update", id))
            })
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        client
            .api
            .delete_network(&id)
            .await
            .during(format!("delete network {}", id))?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted network");

        client.refresh_after_delete(TYPE_NAME).await;
        Ok(())
    }
}
