//! `hpegl_metal_ssh_key`

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{decode, gone_if_missing, state_id, Resource};
use crate::client::models::{NewSshKey, SshKey};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_ssh_key";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SshKeyConfig {
    name: String,
    public_key: String,
}

fn key_state(key: &SshKey) -> Value {
    json!({
        "id": key.id,
        "name": key.name,
        "public_key": key.key,
    })
}

/// `hpegl_metal_ssh_key` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeyResource;

#[async_trait::async_trait]
impl Resource for SshKeyResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An SSH public key that hosts can be provisioned with.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("public_key", Attribute::required_string())
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: SshKeyConfig = decode(planned)?;
        let action = format!("create ssh_key {}", cfg.name);

        let key = client
            .api
            .add_ssh_key(&NewSshKey {
                name: cfg.name,
                key: cfg.public_key,
            })
            .await
            .during(&action)?;
        info!(resource_type = TYPE_NAME, id = %key.id, "Created SSH key");

        let state = key_state(&key);
        client.refresh().await.during(&action).keep_state(|| state.clone())?;
        Ok(state)
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        let key = gone_if_missing(client.api.get_ssh_key(&id).await)
            .during(format!("read ssh_key {}", id))?;
        Ok(key.as_ref().map(key_state))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let action = format!("update ssh_key {}", id);
        let cfg: SshKeyConfig = decode(planned)?;

        let mut key = client.api.get_ssh_key(&id).await.during(&action)?;
        if !cfg.name.is_empty() {
            key.name = cfg.name;
        }
        if !cfg.public_key.is_empty() {
            key.key = cfg.public_key;
        }
        let key = client.api.update_ssh_key(&key).await.during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Updated SSH key");

        client.refresh().await.during(&action)?;
        Ok(key_state(&key))
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        client
            .api
            .delete_ssh_key(&id)
            .await
            .during(format!("delete ssh_key {}", id))?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted SSH key");

        client.refresh_after_delete(TYPE_NAME).await;
        Ok(())
    }
}
