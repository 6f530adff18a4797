//! Data source handlers.
//!
//! Data sources only read. The provider refreshes the available-resources
//! snapshot before each read, so handlers see current portal contents.

pub mod available_images;
pub mod available_resources;
pub mod filter;
pub mod usage;

use serde_json::{Map, Value};

use crate::client::MetalClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

/// A read-only view over the portal.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Full type name, e.g. `hpegl_metal_usage`.
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Checks beyond what the schema expresses.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Produce the data source state from its config.
    async fn read(&self, client: &MetalClient, config: &Value) -> Result<Value, ProviderError>;
}

/// Every data source handler, in registration order.
pub fn all() -> Vec<Box<dyn DataSource>> {
    vec![
        Box::new(available_resources::AvailableResourcesSource),
        Box::new(available_images::AvailableImagesSource),
        Box::new(usage::UsageSource),
    ]
}

/// The config document with `outputs` laid over it.
fn with_outputs(config: &Value, outputs: Value) -> Value {
    let mut state: Map<String, Value> = config.as_object().cloned().unwrap_or_default();
    if let Value::Object(outputs) = outputs {
        state.extend(outputs);
    }
    Value::Object(state)
}
