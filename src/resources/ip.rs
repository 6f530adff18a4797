//! `hpegl_metal_ip`: one address reserved out of an IP pool.
//!
//! The resource ID is `<pool-id>:<ip>`. Pool IDs never contain a colon, so
//! the first colon splits the two and IPv6 addresses survive intact.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{decode, gone_if_missing, state_id, Resource};
use crate::client::models::IpAllocation;
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_ip";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpConfig {
    ip_pool_id: String,
    ip: String,
    usage: String,
}

/// `<pool-id>:<ip>`
pub fn ip_id(pool_id: &str, ip: &str) -> String {
    format!("{}:{}", pool_id, ip)
}

/// Split an ID made by [`ip_id`].
pub fn parse_ip_id(id: &str) -> Result<(&str, &str), ProviderError> {
    match id.split_once(':') {
        Some((pool, ip)) if !pool.is_empty() && !ip.is_empty() => Ok((pool, ip)),
        _ => Err(ProviderError::Validation(format!(
            "IP resource ID {:?} must be of the form pool:ip",
            id
        ))),
    }
}

/// `hpegl_metal_ip` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpResource;

#[async_trait::async_trait]
impl Resource for IpResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An IP address allocated from an IP pool.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "ip_pool_id",
                Attribute::required_string()
                    .force_new()
                    .with_description("Name or ID of the pool to allocate from."),
            )
            .with_attribute("ip", Attribute::required_string().force_new())
            .with_attribute("usage", Attribute::optional_string().force_new())
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: IpConfig = decode(planned)?;
        let action = format!("create IP {}", cfg.ip);

        let pools = client.api.list_ip_pools().await.during(&action)?;
        let pool_id = pools
            .iter()
            .find(|p| p.id == cfg.ip_pool_id || p.name == cfg.ip_pool_id)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| cfg.ip_pool_id.clone());

        let allocation = IpAllocation {
            base: cfg.ip.clone(),
            count: 1,
            usage: cfg.usage.clone(),
        };
        client
            .api
            .allocate_ips(&pool_id, std::slice::from_ref(&allocation))
            .await
            .during(&action)?;
        let id = ip_id(&pool_id, &cfg.ip);
        info!(resource_type = TYPE_NAME, id = %id, "Allocated IP");

        let state = json!({
            "id": id,
            "ip_pool_id": pool_id,
            "ip": cfg.ip,
            "usage": cfg.usage,
        });
        client.refresh().await.during(&action).keep_state(|| state.clone())?;
        Ok(state)
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        let (pool_id, ip) = parse_ip_id(&id)?;

        let pool = gone_if_missing(client.api.get_ip_pool(pool_id).await)
            .during(format!("read IP {}", id))?;
        let Some(pool) = pool else {
            return Ok(None);
        };
        Ok(pool.use_records.iter().find(|r| r.base == ip).map(|record| {
            json!({
                "id": id,
                "ip_pool_id": pool.id,
                "ip": record.base,
                "usage": record.usage,
            })
        }))
    }

    /// Every attribute forces replacement; nothing to do in place.
    async fn update(
        &self,
        _client: &MetalClient,
        _prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        Ok(planned.clone())
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        let (pool_id, ip) = parse_ip_id(&id)?;
        client
            .api
            .return_ips(pool_id, &[ip.to_string()])
            .await
            .during(format!("delete IP {}", id))?;
        info!(resource_type = TYPE_NAME, id = %id, "Returned IP");

        client.refresh_after_delete(TYPE_NAME).await;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let (pool_id, ip) = parse_ip_id(id)?;
        Ok(json!({ "id": id, "ip_pool_id": pool_id, "ip": ip }))
    }
}
