//! Shared types, error model, and configuration for promptbatch.
//!
//! This crate is the foundation depended on by all other promptbatch crates.
//! It provides:
//! - [`PromptBatchError`], the unified error type
//! - Domain types ([`Task`], [`Link`], [`ResultArtifact`], [`BackendSpec`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, EnrichmentConfig, FetchConfig, OutputConfig, RunConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_config_path,
    validate_config,
};
pub use error::{PromptBatchError, Result};
pub use types::{
    ArtifactMetrics, BackendSpec, CURRENT_SCHEMA_VERSION, Link, ResultArtifact, Task,
};
