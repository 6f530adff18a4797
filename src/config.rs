//! Provider settings and credentials.
//!
//! Settings come from the `metal { ... }` provider block, falling back to
//! `HPEGL_METAL_*` environment variables. Credentials come from one of two
//! YAML files, looked up in the home directory and then the working
//! directory:
//!
//! - `.qjwt` for legacy Metal tokens (`Membership` header)
//! - `.gltform` for GreenLake IAM tokens (`Project` and `Space` headers)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;

/// Name of the provider block.
pub const METAL_BLOCK: &str = "metal";

/// Legacy credentials file name.
pub const QJWT_FILE: &str = ".qjwt";

/// GreenLake credentials file name.
pub const GLTFORM_FILE: &str = ".gltform";

/// Environment variable for `project_id`.
pub const ENV_PROJECT_ID: &str = "HPEGL_METAL_PROJECT_ID";
/// Environment variable for `rest_url`.
pub const ENV_REST_URL: &str = "HPEGL_METAL_REST_URL";
/// Environment variable for `space_name`.
pub const ENV_SPACE_NAME: &str = "HPEGL_METAL_SPACE_NAME";
/// Environment variable for `gl_token`.
pub const ENV_GL_TOKEN: &str = "HPEGL_METAL_GL_TOKEN";
/// Environment variable for `glp_role`.
pub const ENV_GLP_ROLE: &str = "HPEGL_METAL_GLP_ROLE";
/// Environment variable for `glp_workspace`.
pub const ENV_GLP_WORKSPACE: &str = "HPEGL_METAL_GLP_WORKSPACE";
/// Overrides the home directory used to find credentials files.
pub const ENV_HOME: &str = "HPEGL_METAL_HOME";

/// Values from the `metal` provider block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetalSettings {
    /// Project to scope requests to; empty means hoster scope in GL mode.
    pub project_id: Option<String>,
    /// Portal REST endpoint.
    pub rest_url: Option<String>,
    /// GreenLake space name.
    pub space_name: Option<String>,
    /// Use a GreenLake IAM token instead of a Metal token.
    pub gl_token: Option<bool>,
    /// GreenLake Platform role.
    pub glp_role: Option<String>,
    /// GreenLake Platform workspace.
    pub glp_workspace: Option<String>,
}

impl MetalSettings {
    /// Extract the `metal` block from a provider configuration document.
    ///
    /// The block may be given as an object or as a one-element list. A
    /// missing block yields empty settings.
    pub fn from_provider_config(config: &Value) -> Result<Self, ProviderError> {
        let block = match config.get(METAL_BLOCK) {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(items)) => match items.as_slice() {
                [] => return Ok(Self::default()),
                [one] => one.clone(),
                _ => {
                    return Err(ProviderError::Validation(
                        "at most one metal block may be specified".to_string(),
                    ))
                },
            },
            Some(other) => other.clone(),
        };
        Ok(serde_json::from_value(block)?)
    }

    /// Fill unset fields from the process environment.
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|key| std::env::var(key).ok())
    }

    /// Fill unset fields using `lookup` for environment values.
    pub fn with_defaults_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fill = |slot: &mut Option<String>, key: &str| {
            if slot.is_none() {
                *slot = lookup(key);
            }
        };
        fill(&mut self.project_id, ENV_PROJECT_ID);
        fill(&mut self.rest_url, ENV_REST_URL);
        fill(&mut self.space_name, ENV_SPACE_NAME);
        fill(&mut self.glp_role, ENV_GLP_ROLE);
        fill(&mut self.glp_workspace, ENV_GLP_WORKSPACE);
        if self.gl_token.is_none() {
            self.gl_token = lookup(ENV_GL_TOKEN).and_then(|v| parse_bool(&v));
        }
        self
    }

    /// Whether GreenLake IAM tokens are used. Defaults to true.
    pub fn use_gl_token(&self) -> bool {
        self.gl_token.unwrap_or(true)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Contents of a legacy `.qjwt` login file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Qjwt {
    /// REST endpoint of the portal.
    pub rest_url: String,
    /// Portal URL the token was issued by.
    pub original_url: String,
    /// User the token belongs to.
    pub user: String,
    /// The Metal token.
    pub jwt: String,
    /// Membership to act as.
    pub member_id: String,
    /// Skip TLS certificate verification.
    pub no_tls: bool,
}

/// Contents of a GreenLake `.gltform` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GlCredentials {
    /// REST endpoint of the portal.
    pub rest_url: String,
    /// GreenLake IAM access token.
    pub access_token: String,
    /// Project to scope requests to.
    pub project_id: String,
    /// GreenLake space name.
    pub space_name: String,
}

/// Parse a `.qjwt` document.
pub fn parse_qjwt(contents: &str) -> Result<Qjwt, ProviderError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Parse a `.gltform` document.
pub fn parse_gltform(contents: &str) -> Result<GlCredentials, ProviderError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Directories searched for credentials files, in order.
pub fn search_dirs() -> Vec<PathBuf> {
    let home = std::env::var_os(ENV_HOME)
        .map(PathBuf::from)
        .or_else(dirs::home_dir);
    home.into_iter()
        .chain(std::env::current_dir().ok())
        .collect()
}

/// Return the first `dir/name` that exists.
pub fn find_file(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| p.is_file())
}

fn read_file(path: &Path) -> Result<String, ProviderError> {
    debug!(path = %path.display(), "Reading credentials file");
    Ok(std::fs::read_to_string(path)?)
}

/// How requests are authenticated and scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Metal-issued token, scoped by membership.
    Legacy {
        /// Sent as the `Membership` header.
        member_id: String,
    },
    /// GreenLake IAM token, scoped by project and space.
    GreenLake {
        /// Sent as the `Project` header when non-empty.
        project_id: String,
        /// Sent as the `Space` header when non-empty.
        space_name: String,
        /// Sent as the `GLP-Role` header when non-empty.
        role: String,
        /// Sent as the `GLP-Workspace` header when non-empty.
        workspace: String,
    },
}

/// Everything needed to build a REST client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Portal REST endpoint, without the API version path.
    pub rest_url: String,
    /// Static bearer token; may be empty when a [`TokenSource`] is used.
    pub token: String,
    /// Authentication mode.
    pub mode: AuthMode,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

impl ClientConfig {
    /// Load credentials for `settings`, searching `dirs` for the token file.
    ///
    /// GreenLake mode is chosen when `gl_token` is set or a token source is
    /// registered. Explicit settings override values from the file.
    pub fn load(
        settings: &MetalSettings,
        dirs: &[PathBuf],
        has_token_source: bool,
    ) -> Result<Self, ProviderError> {
        let config = if settings.use_gl_token() || has_token_source {
            Self::load_greenlake(settings, dirs)?
        } else {
            Self::load_legacy(settings, dirs)?
        };
        config.validate(has_token_source)?;
        Ok(config)
    }

    fn load_legacy(settings: &MetalSettings, dirs: &[PathBuf]) -> Result<Self, ProviderError> {
        let path = find_file(QJWT_FILE, dirs).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "error reading Metal token file: {} not found",
                QJWT_FILE
            ))
        })?;
        let qjwt = parse_qjwt(&read_file(&path)?)?;

        Ok(Self {
            rest_url: non_empty(settings.rest_url.as_deref()).unwrap_or(qjwt.rest_url),
            token: qjwt.jwt,
            mode: AuthMode::Legacy {
                member_id: qjwt.member_id,
            },
            accept_invalid_certs: qjwt.no_tls,
        })
    }

    fn load_greenlake(settings: &MetalSettings, dirs: &[PathBuf]) -> Result<Self, ProviderError> {
        let creds = match find_file(GLTFORM_FILE, dirs) {
            Some(path) => parse_gltform(&read_file(&path)?)?,
            None => GlCredentials::default(),
        };

        Ok(Self {
            rest_url: non_empty(settings.rest_url.as_deref()).unwrap_or(creds.rest_url),
            token: creds.access_token,
            mode: AuthMode::GreenLake {
                project_id: non_empty(settings.project_id.as_deref()).unwrap_or(creds.project_id),
                space_name: non_empty(settings.space_name.as_deref()).unwrap_or(creds.space_name),
                role: settings.glp_role.clone().unwrap_or_default(),
                workspace: settings.glp_workspace.clone().unwrap_or_default(),
            },
            accept_invalid_certs: false,
        })
    }

    /// Reject configurations missing a required field for their mode.
    pub fn validate(&self, has_token_source: bool) -> Result<(), ProviderError> {
        let missing =
            |field: &str| Err(ProviderError::Configuration(format!("{} is not set", field)));

        if self.rest_url.is_empty() {
            return missing("rest_url");
        }
        match &self.mode {
            AuthMode::Legacy { member_id } => {
                if member_id.is_empty() {
                    return missing("member_id");
                }
                if self.token.is_empty() {
                    return missing("jwt");
                }
            },
            AuthMode::GreenLake { .. } => {
                if !has_token_source && self.token.is_empty() {
                    return missing("access_token");
                }
            },
        }
        Ok(())
    }

    /// `<rest_url>/rest/v1`.
    pub fn base_path(&self) -> String {
        format!("{}/rest/v1", self.rest_url.trim_end_matches('/'))
    }

    /// Headers sent with every request.
    pub fn default_headers(&self) -> Vec<(&'static str, String)> {
        match &self.mode {
            AuthMode::Legacy { member_id } => vec![("Membership", member_id.clone())],
            AuthMode::GreenLake {
                project_id,
                space_name,
                role,
                workspace,
            } => [
                ("Project", project_id),
                ("Space", space_name),
                ("GLP-Role", role),
                ("GLP-Workspace", workspace),
            ]
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k, v.clone()))
            .collect(),
        }
    }

    /// GreenLake mode without a project: operations act across projects.
    pub fn is_hoster_context(&self) -> bool {
        matches!(&self.mode, AuthMode::GreenLake { project_id, .. } if project_id.is_empty())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(String::from)
}

/// Supplies a bearer token for each request.
///
/// Implementations typically refresh an IAM token shortly before it expires.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Return the token to use for the next request.
    async fn token(&self) -> Result<String, ProviderError>;
}

/// A token that never changes.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Shared handle to a token source.
pub type SharedTokenSource = Arc<dyn TokenSource>;
