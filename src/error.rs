//! Error types for the metal provider.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while configuring the provider or managing resources.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An attribute document failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A name could not be resolved against the available resources.
    #[error("{kind} {name:?} not found, valid values are {candidates:?}")]
    NotFound {
        /// What was being looked up, e.g. `location` or `machine size`.
        kind: &'static str,
        /// The name or ID supplied by the user.
        name: String,
        /// Every value that would have been accepted.
        candidates: Vec<String>,
    },

    /// A name matched more than one candidate.
    #[error("{kind} {name:?} is ambiguous in {scope}")]
    Ambiguous {
        /// What was being looked up.
        kind: &'static str,
        /// The name supplied by the user.
        name: String,
        /// Where the lookup was scoped to.
        scope: String,
    },

    /// The backend answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Trimmed error message from the response body.
        message: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation failed; carries the operation prefix.
    #[error("failed to {action}: {source}")]
    Operation {
        /// The action that failed, e.g. `create host web-1`.
        action: String,
        /// The underlying failure.
        #[source]
        source: Box<ProviderError>,
    },

    /// A create failed after the portal accepted the new object.
    ///
    /// `state` holds what must still be recorded, at least the `id`, so the
    /// object can be refreshed or destroyed later.
    #[error("{source}")]
    Partial {
        /// State of the object that was created.
        state: Box<Value>,
        /// The failure that followed the create.
        #[source]
        source: Box<ProviderError>,
    },

    /// The backend reported a terminal FAILED state.
    #[error("{0}")]
    Failed(String),

    /// Polling gave up before the backend reached the wanted state.
    #[error("{0}")]
    Timeout(String),

    /// The access token could not be retrieved.
    #[error("Token retrieval failed: {0}")]
    Token(String),

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A credentials file is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested resource or data source type is not registered.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),
}

impl ProviderError {
    /// Build an API error from a response status and body.
    ///
    /// The backend reports errors as `{"message": "..."}`; when the body has
    /// that shape only the message is kept. Surrounding whitespace and
    /// newlines are trimmed either way.
    pub fn api(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| body.to_string());

        Self::Api {
            status,
            message: message.trim_matches(|c| c == '\n' || c == ' ').to_string(),
        }
    }

    /// Shorthand for a lookup miss.
    pub fn not_found(
        kind: &'static str,
        name: impl Into<String>,
        candidates: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            candidates: candidates.into_iter().collect(),
        }
    }

    /// Returns true if the backend reported that the object does not exist.
    ///
    /// Looks through [`ProviderError::Operation`] wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 404,
            Self::Operation { source, .. } | Self::Partial { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The innermost error, below every [`ProviderError::Operation`].
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::Operation { source, .. } | Self::Partial { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the innermost error message without operation prefixes.
    pub fn message(&self) -> String {
        match self {
            Self::Operation { source, .. } | Self::Partial { source, .. } => source.message(),
            Self::Api { message, .. } => message.clone(),
            Self::Configuration(msg)
            | Self::Validation(msg)
            | Self::Failed(msg)
            | Self::Timeout(msg)
            | Self::Token(msg)
            | Self::UnknownResource(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// State to keep for an object whose create failed half way.
    pub fn partial_state(&self) -> Option<&Value> {
        match self {
            Self::Partial { state, .. } => Some(state.as_ref()),
            Self::Operation { source, .. } => source.partial_state(),
            _ => None,
        }
    }
}

/// Attach an operation prefix to an error.
pub trait ResultExt<T> {
    /// Wrap the error as `failed to <action>: <error>`.
    fn during(self, action: impl Into<String>) -> Result<T, ProviderError>;

    /// Attach the state of an already created object to the error.
    fn keep_state(self, state: impl FnOnce() -> Value) -> Result<T, ProviderError>;
}

impl<T, E: Into<ProviderError>> ResultExt<T> for Result<T, E> {
    fn during(self, action: impl Into<String>) -> Result<T, ProviderError> {
        self.map_err(|e| ProviderError::Operation {
            action: action.into(),
            source: Box::new(e.into()),
        })
    }

    fn keep_state(self, state: impl FnOnce() -> Value) -> Result<T, ProviderError> {
        self.map_err(|e| ProviderError::Partial {
            state: Box::new(state()),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("hpegl_metal_widget".to_string());
        assert_eq!(
            format!("{}", err),
            "Unknown resource type: hpegl_metal_widget"
        );

        let err = ProviderError::Timeout("waiting for volume update has timed out".into());
        assert_eq!(format!("{}", err), "waiting for volume update has timed out");
    }

    #[test]
    fn test_not_found_lists_candidates() {
        let err = ProviderError::not_found(
            "machine size",
            "Huge",
            vec!["Small".to_string(), "Large".to_string()],
        );
        assert_eq!(
            format!("{}", err),
            r#"machine size "Huge" not found, valid values are ["Small", "Large"]"#
        );
    }

    #[test]
    fn test_ambiguous_display() {
        let err = ProviderError::Ambiguous {
            kind: "network",
            name: "Public".to_string(),
            scope: "location \"USA:Central:V2DCC01\"".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            r#"network "Public" is ambiguous in location "USA:Central:V2DCC01""#
        );
    }

    #[test]
    fn test_api_error_trims_message() {
        let err = ProviderError::api(409, "{\"message\": \"\\n volume is busy \\n\"}");
        assert_eq!(err.message(), "volume is busy");
        assert_eq!(format!("{}", err), "volume is busy (HTTP 409)");

        let err = ProviderError::api(500, "  gateway exploded\n");
        assert_eq!(err.message(), "gateway exploded");
    }

    #[test]
    fn test_operation_prefix() {
        let result: Result<(), ProviderError> = Err(ProviderError::api(404, "no such host"));
        let err = result.during("read host h-1").unwrap_err();

        assert_eq!(
            format!("{}", err),
            "failed to read host h-1: no such host (HTTP 404)"
        );
        assert!(err.is_not_found());
        assert_eq!(err.message(), "no such host");
        assert!(matches!(err.root(), ProviderError::Api { status: 404, .. }));
    }

    #[test]
    fn test_keep_state_after_create() {
        let result: Result<(), ProviderError> = Err(ProviderError::api(503, "portal is busy"));
        let err = result
            .during("create volume data")
            .keep_state(|| serde_json::json!({"id": "vol-1"}))
            .unwrap_err();

        assert_eq!(
            format!("{}", err),
            "failed to create volume data: portal is busy (HTTP 503)"
        );
        assert_eq!(err.partial_state().unwrap()["id"], "vol-1");
        assert_eq!(err.message(), "portal is busy");
        assert!(matches!(err.root(), ProviderError::Api { status: 503, .. }));

        let plain: Result<(), ProviderError> = Err(ProviderError::Failed("boom".into()));
        assert!(plain.during("create host").unwrap_err().partial_state().is_none());
    }

    #[test]
    fn test_is_not_found_only_for_404() {
        assert!(!ProviderError::api(500, "boom").is_not_found());
        assert!(!ProviderError::Failed("unable to delete host".into()).is_not_found());
    }
}
