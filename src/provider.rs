//! [`MetalProvider`]: the [`ProviderService`] for HPE GreenLake Metal.
//!
//! The provider owns the handler registry and, once configured, one shared
//! [`MetalClient`]. Every operation looks up its handler by type name and
//! hands it the client.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::client::{MetalClient, RestClient};
use crate::config::{
    self, ClientConfig, MetalSettings, SharedTokenSource, ENV_GLP_ROLE, ENV_GLP_WORKSPACE,
    ENV_GL_TOKEN, ENV_PROJECT_ID, ENV_REST_URL, ENV_SPACE_NAME, METAL_BLOCK,
};
use crate::data_sources::{self, DataSource};
use crate::error::{ProviderError, ResultExt};
use crate::poll::PollSettings;
use crate::resources::{self, Resource};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// The HPE GreenLake Metal provider.
pub struct MetalProvider {
    client: RwLock<Option<Arc<MetalClient>>>,
    resources: Vec<Box<dyn Resource>>,
    data_sources: Vec<Box<dyn DataSource>>,
    token_source: Option<SharedTokenSource>,
    search_dirs: Option<Vec<PathBuf>>,
}

impl Default for MetalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalProvider")
            .field("token_source", &self.token_source.is_some())
            .field("search_dirs", &self.search_dirs)
            .finish_non_exhaustive()
    }
}

impl MetalProvider {
    /// An unconfigured provider with every resource and data source registered.
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            resources: resources::all(),
            data_sources: data_sources::all(),
            token_source: None,
            search_dirs: None,
        }
    }

    /// A provider that is already configured with `client`.
    pub fn with_client(client: MetalClient) -> Self {
        Self {
            client: RwLock::new(Some(Arc::new(client))),
            ..Self::new()
        }
    }

    /// Ask `source` for a bearer token before every request.
    ///
    /// Registering a token source selects GreenLake mode.
    pub fn with_token_source(mut self, source: SharedTokenSource) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Look for credentials files in `dirs` instead of home and working directory.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = Some(dirs);
        self
    }

    /// The configured client.
    pub async fn client(&self) -> Result<Arc<MetalClient>, ProviderError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Configuration("provider is not configured".to_string()))
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .iter()
            .find(|r| r.type_name() == type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .iter()
            .find(|d| d.type_name() == type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }
}

/// The `metal { ... }` provider block.
pub fn provider_schema() -> Schema {
    let env_string = |var: &str, description: &str| {
        Attribute::optional_string()
            .from_env(var)
            .with_description(description)
    };
    let metal = Block::new()
        .with_attribute(
            "project_id",
            env_string(ENV_PROJECT_ID, "Project to act in; empty acts across projects."),
        )
        .with_attribute("rest_url", env_string(ENV_REST_URL, "Metal portal REST endpoint."))
        .with_attribute("space_name", env_string(ENV_SPACE_NAME, "GreenLake space name."))
        .with_attribute(
            "gl_token",
            Attribute::optional_bool()
                .with_default(Value::Bool(true))
                .from_env(ENV_GL_TOKEN)
                .with_description(
                    "Authenticate with a GreenLake IAM token instead of a Metal token.",
                ),
        )
        .with_attribute("glp_role", env_string(ENV_GLP_ROLE, "GreenLake Platform role."))
        .with_attribute(
            "glp_workspace",
            env_string(ENV_GLP_WORKSPACE, "GreenLake Platform workspace."),
        );

    Schema::v0().with_block(METAL_BLOCK, NestedBlock::list(metal).with_max_items(1))
}

#[async_trait::async_trait]
impl ProviderService for MetalProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new().with_provider_config(provider_schema());
        let schema = self
            .resources
            .iter()
            .fold(schema, |s, r| s.with_resource(r.type_name(), r.schema()));
        self.data_sources
            .iter()
            .fold(schema, |s, d| s.with_data_source(d.type_name(), d.schema()))
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&provider_schema(), &config);
        if let Err(e) = MetalSettings::from_provider_config(&config) {
            diagnostics.push(Diagnostic::error(e.message()).with_attribute(METAL_BLOCK));
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let settings = MetalSettings::from_provider_config(&config)?.with_env_defaults();
        let dirs = self.search_dirs.clone().unwrap_or_else(config::search_dirs);
        let client_config = ClientConfig::load(&settings, &dirs, self.token_source.is_some())?;
        let hoster = client_config.is_hoster_context();

        let api = RestClient::new(&client_config, self.token_source.clone())?;
        let client = MetalClient::new(Arc::new(api), PollSettings::from_env()).with_hoster(hoster);
        if !hoster {
            client.refresh().await.during("load available resources")?;
        }
        info!(rest_url = %client_config.rest_url, hoster, "Configured provider");

        *self.client.write().await = Some(Arc::new(client));
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let mut diagnostics = validation::validate(&handler.schema(), &config);
        diagnostics.extend(handler.validate(&config));
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let handler = self.resource(resource_type)?;
        Ok(PlanResult::between(&handler.schema(), prior_state.as_ref(), &proposed_state))
    }

    #[instrument(skip(self, planned_state))]
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = handler.create(&client, &planned_state).await;
        if let Err(e) = &result {
            if let Some(state) = e.partial_state() {
                warn!(
                    resource_type,
                    id = state["id"].as_str().unwrap_or_default(),
                    error = %e,
                    "Create failed after the object was created, keeping it in state"
                );
            }
        }
        result
    }

    #[instrument(skip(self, current_state))]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let client = self.client().await?;
        handler.read(&client, &current_state).await
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let client = self.client().await?;
        handler.update(&client, &prior_state, &planned_state).await
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.resource(resource_type)?;
        let client = self.client().await?;
        handler.delete(&client, &current_state).await
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let state = handler.import_state(id)?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.data_source(data_source_type)?;
        let mut diagnostics = validation::validate(&handler.schema(), &config);
        diagnostics.extend(handler.validate(&config));
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.data_source(data_source_type)?;
        let client = self.client().await?;
        client
            .refresh()
            .await
            .during(format!("read {}", data_source_type))?;
        handler.read(&client, &config).await
    }
}
