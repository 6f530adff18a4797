//! `hpegl_metal_project`: a tenant with its profile and resource limits.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{decode, gone_if_missing, single_block, state_id, Resource};
use crate::client::models::{Limits, NewProject, Profile, Project};
use crate::client::MetalClient;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, AttributeType, Block, NestedBlock, Schema};

pub const TYPE_NAME: &str = "hpegl_metal_project";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectConfig {
    name: String,
    #[serde(deserialize_with = "single_block")]
    profile: Option<ProfileConfig>,
    #[serde(deserialize_with = "single_block")]
    limits: Option<LimitsConfig>,
    permitted_sites: Vec<String>,
    permitted_images: Vec<String>,
    boot_from_san_allowed: bool,
    replication_allowed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileConfig {
    project_name: String,
    project_description: String,
    company: String,
    address: String,
    email: String,
    phone_number: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitsConfig {
    hosts: i64,
    volumes: i64,
    volume_capacity: i64,
    private_networks: i64,
    instance_types: BTreeMap<String, i64>,
}

impl ProjectConfig {
    fn into_new_project(self) -> NewProject {
        let profile = self.profile.unwrap_or_default();
        let limits = self.limits.unwrap_or_default();
        NewProject {
            name: self.name,
            profile: Profile {
                team_name: profile.project_name,
                team_desc: profile.project_description,
                company: profile.company,
                address: profile.address,
                email: profile.email,
                phone_number: profile.phone_number,
                ..Default::default()
            },
            limits: Limits {
                hosts: limits.hosts,
                volumes: limits.volumes,
                volume_capacity: limits.volume_capacity,
                private_networks: limits.private_networks,
                instance_types: limits.instance_types,
            },
            permitted_sites: self.permitted_sites,
            permitted_images: self.permitted_images,
            boot_from_san_allowed: self.boot_from_san_allowed,
            replication_allowed: self.replication_allowed,
        }
    }
}

fn project_state(prior: &Value, project: &Project) -> Value {
    let mut state: Map<String, Value> = prior.as_object().cloned().unwrap_or_default();
    let profile = &project.profile;
    let limits = &project.limits;
    let fields = json!({
        "id": project.id,
        "name": project.name,
        "profile": [{
            "project_name": profile.team_name,
            "project_description": profile.team_desc,
            "company": profile.company,
            "address": profile.address,
            "email": profile.email,
            "email_verified": profile.email_verified,
            "phone_number": profile.phone_number,
            "phone_number_verified": profile.phone_verified,
        }],
        "limits": [{
            "hosts": limits.hosts,
            "volumes": limits.volumes,
            "volume_capacity": limits.volume_capacity,
            "private_networks": limits.private_networks,
            "instance_types": limits.instance_types,
        }],
        "permitted_sites": project.permitted_sites,
        "permitted_images": project.permitted_images,
        "boot_from_san_allowed": project.boot_from_san_allowed,
        "replication_allowed": project.replication_allowed,
    });
    if let Value::Object(fields) = fields {
        state.extend(fields);
    }
    Value::Object(state)
}

/// `hpegl_metal_project` handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectResource;

#[async_trait::async_trait]
impl Resource for ProjectResource {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let profile = Block::new()
            .with_attribute("project_name", Attribute::required_string())
            .with_attribute("project_description", Attribute::optional_string())
            .with_attribute("company", Attribute::optional_string())
            .with_attribute("address", Attribute::optional_string())
            .with_attribute("email", Attribute::required_string())
            .with_attribute("email_verified", Attribute::computed_bool())
            .with_attribute("phone_number", Attribute::optional_string())
            .with_attribute("phone_number_verified", Attribute::computed_bool());

        let limits = Block::new()
            .with_attribute("hosts", Attribute::optional_int64())
            .with_attribute("volumes", Attribute::optional_int64())
            .with_attribute(
                "volume_capacity",
                Attribute::optional_int64().with_description("Total volume capacity in GiB."),
            )
            .with_attribute("private_networks", Attribute::optional_int64())
            .with_attribute(
                "instance_types",
                Attribute::optional(AttributeType::Map(Box::new(AttributeType::Int64)))
                    .with_description("Host caps per machine size ID."),
            );

        Schema::v0()
            .with_description("A project (tenant).")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("permitted_sites", Attribute::optional(AttributeType::string_list()))
            .with_attribute("permitted_images", Attribute::optional(AttributeType::string_list()))
            .with_attribute("boot_from_san_allowed", Attribute::optional_bool())
            .with_attribute("replication_allowed", Attribute::optional_bool())
            .with_block(
                "profile",
                NestedBlock::list(profile).with_min_items(1).with_max_items(1),
            )
            .with_block(
                "limits",
                NestedBlock::list(limits).with_min_items(1).with_max_items(1),
            )
    }

    async fn create(&self, client: &MetalClient, planned: &Value) -> Result<Value, ProviderError> {
        let cfg: ProjectConfig = decode(planned)?;
        let action = format!("create project {}", cfg.name);

        let project = client
            .api
            .add_project(&cfg.into_new_project())
            .await
            .during(&action)?;
        info!(resource_type = TYPE_NAME, id = %project.id, "Created project");
        Ok(project_state(planned, &project))
    }

    async fn read(
        &self,
        client: &MetalClient,
        state: &Value,
    ) -> Result<Option<Value>, ProviderError> {
        let id = state_id(state)?;
        let project = gone_if_missing(client.api.get_project(&id).await)
            .during(format!("read project {}", id))?;
        Ok(project.map(|p| project_state(state, &p)))
    }

    async fn update(
        &self,
        client: &MetalClient,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = state_id(prior)?;
        let action = format!("update project {}", id);
        let cfg: ProjectConfig = decode(planned)?;

        let current = client.api.get_project(&id).await.during(&action)?;
        let new = cfg.into_new_project();
        let mut project = Project {
            id: id.clone(),
            name: new.name,
            profile: new.profile,
            limits: new.limits,
            permitted_sites: new.permitted_sites,
            permitted_images: new.permitted_images,
            boot_from_san_allowed: new.boot_from_san_allowed,
            replication_allowed: new.replication_allowed,
            etag: current.etag,
        };
        project.profile.email_verified = current.profile.email_verified;
        project.profile.phone_verified = current.profile.phone_verified;

        let updated = client.api.update_project(&project).await.during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Updated project");
        Ok(project_state(planned, &updated))
    }

    async fn delete(&self, client: &MetalClient, state: &Value) -> Result<(), ProviderError> {
        let id = state_id(state)?;
        let action = format!("delete project {}", id);

        let current = client.api.get_project(&id).await.during(&action)?;
        client.api.delete_project(&id, &current.etag).await.during(&action)?;
        info!(resource_type = TYPE_NAME, id = %id, "Deleted project");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::sample;
    use crate::testing::FakeMetal;

    fn config() -> Value {
        json!({
            "name": "blue",
            "profile": [{
                "project_name": "Blue Team",
                "email": "blue@example.com",
                "company": "Example",
            }],
            "limits": [{
                "hosts": 5,
                "volumes": 10,
                "volume_capacity": 300,
                "private_networks": 2,
                "instance_types": {"size-s": 3},
            }],
            "permitted_sites": ["loc-1"],
        })
    }

    #[tokio::test]
    async fn test_create_maps_profile_and_limits() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);

        let state = ProjectResource.create(&client, &config()).await.unwrap();
        assert_eq!(state["id"], "proj-1");
        assert_eq!(state["profile"][0]["project_name"], "Blue Team");
        assert_eq!(state["limits"][0]["instance_types"]["size-s"], 3);

        let sent = fake.state().last_new_project.clone().unwrap();
        assert_eq!(sent.profile.team_name, "Blue Team");
        assert_eq!(sent.limits.hosts, 5);
        assert_eq!(sent.permitted_sites, vec!["loc-1"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_use_current_etag() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        let prior = ProjectResource.create(&client, &config()).await.unwrap();
        let mut planned = prior.clone();
        planned["limits"][0]["hosts"] = json!(8);

        let state = ProjectResource.update(&client, &prior, &planned).await.unwrap();
        assert_eq!(state["limits"][0]["hosts"], 8);
        assert_eq!(fake.state().projects["proj-1"].etag, "etag-1+");

        ProjectResource.delete(&client, &state).await.unwrap();
        assert_eq!(fake.calls_to("delete_project"), vec!["delete_project proj-1 etag-1+"]);
    }

    #[tokio::test]
    async fn test_stale_etag_is_rejected() {
        let fake = FakeMetal::new(sample());
        let client = fake.client(10);
        ProjectResource.create(&client, &config()).await.unwrap();

        let mut stale = fake.state().projects["proj-1"].clone();
        stale.etag = "old".into();
        let err = client.api.update_project(&stale).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 412, .. }));
    }
}
