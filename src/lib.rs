//! HPE GreenLake Metal provider
//!
//! Declarative management of bare-metal hosts, volumes, networks, projects,
//! SSH keys, IP allocations and OS images on an HPE GreenLake for Private
//! Cloud Metal portal.
//!
//! # Overview
//!
//! A plugin runtime owns the wire protocol and drives [`MetalProvider`]
//! through the [`ProviderService`] trait, passing attribute documents as
//! `serde_json::Value`:
//!
//! - **Resources**: `hpegl_metal_host`, `hpegl_metal_volume`,
//!   `hpegl_metal_network`, `hpegl_metal_project`, `hpegl_metal_ssh_key`,
//!   `hpegl_metal_ip`, `hpegl_metal_image`
//! - **Data sources**: `hpegl_metal_available_resources`,
//!   `hpegl_metal_available_images`, `hpegl_metal_usage`
//! - **Provider block**: `metal { ... }`, each attribute defaulting from an
//!   `HPEGL_METAL_*` environment variable
//!
//! # Quick Start
//!
//! ```ignore
//! use hpegl_metal_provider::{init_logging, MetalProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = MetalProvider::new();
//!     provider
//!         .configure(json!({"metal": [{"project_id": "7d4c...", "space_name": "Default"}]}))
//!         .await?;
//!
//!     let key = provider
//!         .create(
//!             "hpegl_metal_ssh_key",
//!             json!({"name": "deploy", "public_key": "ssh-ed25519 AAAA... deploy"}),
//!         )
//!         .await?;
//!     println!("created {}", key["id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Credentials
//!
//! Configure reads one YAML file from the home directory (or
//! `HPEGL_METAL_HOME`), falling back to the working directory:
//!
//! - `.gltform` with a GreenLake IAM token (the default, `gl_token = true`)
//! - `.qjwt` with a Metal token (`gl_token = false`)
//!
//! A [`TokenSource`] registered with [`MetalProvider::with_token_source`]
//! replaces the file token and is asked for a fresh token before every
//! request.

#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod poll;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod service;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use client::{MetalApi, MetalClient, RestClient};
pub use config::{StaticToken, TokenSource};
pub use error::{ProviderError, ResultExt};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::MetalProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
