//! Resource handlers.
//!
//! Each handler owns one resource type: its schema and its CRUD operations.
//! Attribute documents are decoded into typed config structs once per
//! operation and state is rebuilt from the portal's answer.

pub mod host;
pub mod image;
pub mod ip;
pub mod network;
pub mod project;
pub mod ssh_key;
pub mod volume;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::client::MetalClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

/// CRUD operations for one resource type.
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// Full type name, e.g. `hpegl_metal_host`.
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Checks beyond what the schema expresses.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the resource and return its state.
    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError>;

    /// Current state, or `None` once the resource is gone.
    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError>;

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError>;

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError>;

    /// Seed state for `terraform import`; a read fills in the rest.
    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        Ok(serde_json::json!({ "id": id }))
    }
}

/// Every resource handler, in registration order.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(host::HostResource),
        Box::new(volume::VolumeResource),
        Box::new(network::NetworkResource),
        Box::new(project::ProjectResource),
        Box::new(ssh_key::SshKeyResource),
        Box::new(ip::IpResource),
        Box::new(image::ImageResource),
    ]
}

/// Elements of `a` that are not in `b`, in `a`'s order.
pub fn difference(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().filter(|x| !b.contains(x)).cloned().collect()
}

/// Decode an attribute document into `T`.
///
/// Null attributes are dropped first so `#[serde(default)]` applies to
/// them as well as to missing ones.
pub(crate) fn decode<T: DeserializeOwned>(doc: &Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(strip_nulls(doc.clone()))?)
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// The `id` attribute of a state document.
pub(crate) fn state_id(state: &Value) -> Result<String, ProviderError> {
    state
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| ProviderError::Validation("resource state has no id".to_string()))
}

/// The planned document with `id` filled in, recorded when a create fails
/// after the portal accepted the object.
pub(crate) fn created_state(planned: &Value, id: &str) -> Value {
    let mut state = planned.clone();
    if let Value::Object(map) = &mut state {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    state
}

/// Accept a nested block written either as an object or a one-element list.
pub(crate) fn single_block<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrList<T> {
        List(Vec<T>),
        One(T),
    }

    match Option::<OneOrList<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(OneOrList::One(item)) => Ok(Some(item)),
        Some(OneOrList::List(items)) => {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (first, None) => Ok(first),
                _ => Err(serde::de::Error::custom("at most one block may be specified")),
            }
        },
    }
}

/// Treat a backend 404 as "gone" rather than as a failure.
pub(crate) fn gone_if_missing<T>(
    result: Result<T, ProviderError>,
) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
