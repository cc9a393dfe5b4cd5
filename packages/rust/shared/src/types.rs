//! Core domain types for promptbatch runs and their result artifacts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the result artifact format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of work: a prompt bound for a single backend call.
///
/// Tasks are validated once by the loader and never mutated after they
/// are enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Stable identifier. `None` means the task is always regenerated and
    /// gets a unique artifact name.
    pub id: Option<String>,
    /// Raw prompt text, possibly containing `[text](url)` links.
    pub content: String,
    /// System instruction (batch default unless the record overrides it).
    pub system_instruction: String,
    /// Modification time of the source the task was loaded from.
    pub source_modified: DateTime<Utc>,
    /// File the record came from.
    pub source: PathBuf,
}

impl Task {
    /// Label used in logs: the id, or `<unnamed>`.
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("<unnamed>")
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// A `[text](url)` link embedded in a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Display text between the brackets.
    pub text: String,
    /// Target between the parentheses.
    pub url: String,
}

impl Link {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// BackendSpec
// ---------------------------------------------------------------------------

/// Identity of one inference backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// `host:port` or base URL.
    pub host: String,
    /// GPU / compute-unit index the host is pinned to.
    pub compute_unit: u32,
}

impl BackendSpec {
    pub fn new(host: impl Into<String>, compute_unit: u32) -> Self {
        Self {
            host: host.into(),
            compute_unit,
        }
    }
}

impl std::fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (unit {})", self.host, self.compute_unit)
    }
}

// ---------------------------------------------------------------------------
// ResultArtifact
// ---------------------------------------------------------------------------

/// Timing and size metrics for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the invocation.
    pub duration_ms: u64,
    /// Character count of the raw generated text.
    pub response_chars: usize,
    /// Whitespace-separated word count of the stored response.
    pub words: usize,
    /// `words / seconds`, zero when the duration is zero.
    pub words_per_second: f64,
}

/// The `<key>.json` structure written for each completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultArtifact {
    /// Schema version for forward compatibility.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Task id, absent for unnamed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Original prompt as loaded.
    pub prompt: String,
    /// Everything actually sent to the backend.
    #[serde(default)]
    pub assembled_prompt: String,
    /// Generated text with reasoning blocks removed.
    pub response: String,
    /// First reasoning block, trimmed.
    #[serde(default, alias = "think", skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Timing metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ArtifactMetrics>,
    /// Backend that produced the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendSpec>,
    /// Model identifier.
    #[serde(default)]
    pub model: String,
    /// SHA-256 of the assembled prompt.
    #[serde(default)]
    pub prompt_sha256: String,
    /// Time of successful persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}
