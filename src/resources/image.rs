//! `hpegl_metal_image`: an OS service image uploaded from a local YAML file.
//!
//! The portal has no read-back for service definitions, so reads return the
//! stored state unchanged.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{decode, state_id, Resource};
use crate::client::models::Service;
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_image";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageConfig {
    os_service_image_file: String,
}

/// The fields of a service definition this provider reports back.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct ServiceDefinition {
    name: String,
    flavor: String,
    version: String,
    category: String,
}

/// A service definition file read from disk.
struct ServiceFile {
    file_name: String,
    contents: Vec<u8>,
    definition: ServiceDefinition,
}

impl ServiceFile {
    async fn load(path: &str) -> Result<Self, ProviderError> {
        let contents = tokio::fs::read(path).await.during(format!("open file {}", path))?;
        let definition: ServiceDefinition =
            serde_yaml::from_slice(&contents).during(format!("parse file {}", path))?;
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Ok(Self {
            file_name,
            contents,
            definition,
        })
    }

    /// State after an upload; the portal's answer wins over the file.
    fn state(&self, path: &str, service: &Service) -> Value {
        let pick = |portal: &str, file: &str| {
            if portal.is_empty() {
                file.to_string()
            } else {
                portal.to_string()
            }
        };
        json!({
            "id": service.id,
            "os_service_image_file": path,
            "name": pick(&service.name, &self.definition.name),
            "flavor": pick(&service.flavor, &self.definition.flavor),
            "version": pick(&service.version, &self.definition.version),
            "category": pick(&service.category, &self.definition.category),
        })
    }
}

/// `hpegl_metal_image` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageResource;

#[async_trait::async_trait]
impl Resource for ImageResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("An OS service image.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "os_service_image_file",
                Attribute::required_string()
                    .with_description("Path to the YAML service image definition."),
            )
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("flavor", Attribute::computed_string())
            .with_attribute("version", Attribute::computed_string())
            .with_attribute("category", Attribute::computed_string())
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: ImageConfig = decode(planned)?;
        let action = "create OS service image";

        let file = ServiceFile::load(&cfg.os_service_image_file).await.during(action)?;
        let service = client
            .api
            .add_service(&file.file_name, file.contents.clone())
            .await
            .during(action)?;
        info!(
            resource_type = TYPE_NAME,
            id = %service.id,
            flavor = %file.definition.flavor,
            version = %file.definition.version,
            "Uploaded service image"
        );
        Ok(file.state(&cfg.os_service_image_file, &service))
    }

    async fn read(
        &self,
        _client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        Ok(Some(state.clone()))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let cfg: ImageConfig = decode(planned)?;
        let action = "replace OS service image";

        let file = ServiceFile::load(&cfg.os_service_image_file).await.during(action)?;
        let service = client
            .api
            .update_service(&id, &file.file_name, file.contents.clone())
            .await
            .during(action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Replaced service image");
        Ok(file.state(&cfg.os_service_image_file, &service))
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        client.api.delete_service(&id).await.during("delete OS service image")?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted service image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;
    use crate::testing::FakeMetal;
    use tempfile::TempDir;

    fn write_definition(dir: &TempDir, version: &str) -> String {
        let path = dir.path().join("ubuntu.yml");
        let body = format!(
            "name: Ubuntu custom\nflavor: ubuntu\nversion: {}\ncategory: linux\ntype: deploy\n",
            version
        );
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_upload_and_replace() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(&dir, "24.04");
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);

        let state = ImageResource
            .create(&client, &json!({ "os_service_image_file": path }))
            .await
            .unwrap();
        assert_eq!(state["id"], "svc-1");
        assert_eq!(state["flavor"], "ubuntu");
        assert_eq!(state["version"], "24.04");
        assert_eq!(fake.calls_to("add_service"), vec!["add_service ubuntu.yml"]);

        assert_eq!(ImageResource.read(&client, &state).await.unwrap(), Some(state.clone()));

        write_definition(&dir, "24.10");
        let state = ImageResource.update(&client, &state, &state).await.unwrap();
        assert_eq!(state["version"], "24.10");
        assert_eq!(fake.calls_to("update_service"), vec!["update_service svc-1 ubuntu.yml"]);

        ImageResource.delete(&client, &state).await.unwrap();
        assert!(fake.state().services.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        let err = ImageResource
            .create(&client, &json!({"os_service_image_file": "/nonexistent/svc.yml"}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with(
            "failed to create OS service image: failed to open file /nonexistent/svc.yml"
        ));
        assert!(matches!(err.root(), ProviderError::Io(_)));
    }

    #[test]
    fn test_definition_ignores_unknown_keys() {
        let def: ServiceDefinition =
            serde_yaml::from_str("flavor: rhel\nversion: '9'\nextra: [1, 2]\n").unwrap();
        assert_eq!(def.flavor, "rhel");
        assert_eq!(def.version, "9");
    }
}
