//! Application configuration for promptbatch.
//!
//! The config file is looked up in this order: an explicit `--config` path,
//! `./config.toml`, then `~/.promptbatch/config.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PromptBatchError, Result};
use crate::types::BackendSpec;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".promptbatch";

// ---------------------------------------------------------------------------
// Config structs (matching config.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// System instruction shared by every prompt unless a record overrides it.
    #[serde(default)]
    pub system_message: String,

    /// Backend host (`host:port` or base URL) mapped to its compute-unit index.
    #[serde(default)]
    pub ollama_instances: BTreeMap<String, u32>,

    /// Reference fetching.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Enrichment block framing.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Backend client settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Result output.
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_message: String::new(),
            ollama_instances: BTreeMap::from([("localhost:11434".to_string(), 0)]),
            fetch: FetchConfig::default(),
            enrichment: EnrichmentConfig::default(),
            backend: BackendConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_model() -> String {
    "llama3.2".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Fail the whole task when any reference URL cannot be fetched.
    #[serde(default)]
    pub strict: bool,

    /// Per-request timeout for reference fetches.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Maximum characters of fetched content kept per reference.
    #[serde(default = "default_max_reference_chars")]
    pub max_reference_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            strict: false,
            timeout_secs: default_fetch_timeout(),
            max_reference_chars: default_max_reference_chars(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_reference_chars() -> usize {
    1500
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Optional cultural/locale framing line added after the date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_note: Option<String>,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upper bound on a single generation request.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    600
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `<key>.json` / `<key>.txt` artifacts.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "responses".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one batch run, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model identifier.
    pub model: String,
    /// Default system instruction.
    pub system_message: String,
    /// One worker is started per backend.
    pub backends: Vec<BackendSpec>,
    /// Where artifacts are written.
    pub output_dir: PathBuf,
    /// Strict vs. lenient reference fetching.
    pub strict_fetch: bool,
    /// Timeout for each reference fetch.
    pub fetch_timeout: Duration,
    /// Per-reference character cap.
    pub max_reference_chars: usize,
    /// Optional locale framing line.
    pub locale_note: Option<String>,
    /// Timeout for each generation request.
    pub backend_timeout: Duration,
    /// Regenerate even when the stored artifact is newer than its source.
    pub force: bool,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_message: config.system_message.clone(),
            backends: config
                .ollama_instances
                .iter()
                .map(|(host, unit)| BackendSpec::new(host.clone(), *unit))
                .collect(),
            output_dir: PathBuf::from(&config.output.dir),
            strict_fetch: config.fetch.strict,
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_reference_chars: config.fetch.max_reference_chars,
            locale_note: config.enrichment.locale_note.clone(),
            backend_timeout: Duration::from_secs(config.backend.timeout_secs),
            force: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.promptbatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PromptBatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.promptbatch/config.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Pick the config file to load, or `None` when no candidate exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(Some(local));
    }

    let user = config_file_path()?;
    if user.is_file() {
        return Ok(Some(user));
    }

    Ok(None)
}

/// Load the application config. Returns defaults if no config file is found.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    match resolve_config_path(explicit)? {
        Some(path) => load_config_from(&path),
        None => {
            tracing::debug!("config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PromptBatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PromptBatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a default config file to `path` (or the user config location).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if path.exists() {
        return Err(PromptBatchError::config(format!(
            "{} already exists; refusing to overwrite",
            path.display()
        )));
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| PromptBatchError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| PromptBatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PromptBatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the config can drive a run: a model and at least one backend.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.model.trim().is_empty() {
        return Err(PromptBatchError::config("`model` must not be empty"));
    }
    if config.ollama_instances.is_empty() {
        return Err(PromptBatchError::config(
            "no backends configured. Add hosts under [ollama_instances], e.g. \"localhost:11434\" = 0",
        ));
    }
    if let Some(host) = config.ollama_instances.keys().find(|h| h.trim().is_empty()) {
        return Err(PromptBatchError::config(format!(
            "invalid backend host {host:?}"
        )));
    }
    Ok(())
}
