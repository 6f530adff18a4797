//! `hpegl_metal_available_images`: OS images, optionally filtered.

use serde_json::{json, Value};
use tracing::debug;

use super::filter::{self, filter_block, FilterSet, FILTER};
use super::{with_outputs, DataSource};
use crate::client::MetalClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_available_images";

const FILTER_FIELDS: &[&str] = &["flavor", "category", "version"];

/// `hpegl_metal_available_images` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailableImagesSource;

#[async_trait::async_trait]
impl DataSource for AvailableImagesSource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("OS images available for host provisioning.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "images",
                Attribute::computed(AttributeType::object_list([
                    ("id", AttributeType::String),
                    ("flavor", AttributeType::String),
                    ("version", AttributeType::String),
                    ("category", AttributeType::String),
                ])),
            )
            .with_block(FILTER, filter_block())
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        filter::diagnostics(config, FILTER_FIELDS)
    }

    async fn read(&self, client: &MetalClient, config: &Value) -> Result<Value, ProviderError> {
        let filters = FilterSet::from_config(config)?;
        let resources = client.snapshot().await;

        let images: Vec<Value> = resources
            .images
            .iter()
            .filter(|image| {
                filters.matches(&[
                    ("flavor", image.flavor.as_str()),
                    ("category", image.category.as_str()),
                    ("version", image.version.as_str()),
                ])
            })
            .map(|image| {
                json!({
                    "id": image.id,
                    "flavor": image.flavor,
                    "version": image.version,
                    "category": image.category,
                })
            })
            .collect();
        debug!(total = resources.images.len(), matched = images.len(), "Filtered images");

        Ok(with_outputs(config, json!({ "id": "images", "images": images })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;
    use crate::testing::FakeMetal;

    #[tokio::test]
    async fn test_unfiltered_lists_every_image() {
        let client = FakeMetal::new(sample()).client(10);
        let state = AvailableImagesSource.read(&client, &json!({})).await.unwrap();
        assert_eq!(state["id"], "images");
        assert_eq!(state["images"].as_array().unwrap().len(), 3);
        assert_eq!(state["images"][2]["category"], "windows");
    }

    #[tokio::test]
    async fn test_filters_by_flavor_and_version() {
        let client = FakeMetal::new(sample()).client(10);
        let config = json!({
            "filter": [
                {"name": "flavor", "values": ["ubuntu"]},
                {"name": "version", "values": ["^22"]},
            ]
        });
        let state = AvailableImagesSource.read(&client, &config).await.unwrap();
        assert_eq!(
            state["images"],
            json!([{
                "id": "svc-ubuntu-2204",
                "flavor": "ubuntu",
                "version": "22.04",
                "category": "linux",
            }])
        );
        assert_eq!(state["filter"], config["filter"]);
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let config = json!({"filter": [{"name": "flavor", "values": ["["]}]});
        let diags = AvailableImagesSource.validate(&config);
        assert_eq!(diags.len(), 1);
    }
}
