//! On-disk result store.
//!
//! Each task's output lives at `<output_dir>/<key>.json` (the artifact) and
//! `<output_dir>/<key>.txt` (a clean plain-text rendering). The artifact's
//! `updated_at` field drives the staleness check.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use promptbatch_shared::{
    ArtifactMetrics, BackendSpec, CURRENT_SCHEMA_VERSION, PromptBatchError, Result,
    ResultArtifact,
};

use crate::tags::{ARTICLE_TAGS, MatchPolicy, THINK_TAGS, extract_first, strip_all};

/// Special tokens some models leak into their output.
const GENERATION_TOKENS: &[&str] = &[
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|eot_id|>",
    "<|end|>",
    "<s>",
    "</s>",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything needed to persist one completed generation.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub id: Option<String>,
    /// Prompt as loaded.
    pub prompt: String,
    /// Prompt as sent (enrichment block + rewritten prompt).
    pub assembled_prompt: String,
    /// Raw backend output, reasoning included.
    pub generated_text: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub response_chars: usize,
    pub backend: BackendSpec,
    pub model: String,
}

/// Where an artifact was written and what it contains.
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub key: String,
    pub json_path: PathBuf,
    pub text_path: PathBuf,
    pub artifact: ResultArtifact,
}

/// Only the fields the staleness check needs.
#[derive(Deserialize)]
struct ArtifactStamp {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ResultStore
// ---------------------------------------------------------------------------

/// Reads and writes result artifacts under one output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    output_dir: PathBuf,
}

impl ResultStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File stem for a task: the sanitized id, or a fresh `<epoch>-<uuid>`
    /// name for unnamed tasks. Ids that needed sanitizing get a short hash
    /// suffix so distinct ids never share a stem.
    pub fn artifact_key(id: Option<&str>) -> String {
        match id.map(sanitize_key).filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => format!("{}-{}", Utc::now().timestamp(), Uuid::now_v7().simple()),
        }
    }

    pub fn json_path(&self, key: &str) -> PathBuf {
        self.output_dir.join(format!("{key}.json"))
    }

    pub fn text_path(&self, key: &str) -> PathBuf {
        self.output_dir.join(format!("{key}.txt"))
    }

    /// Whether the task must be (re)generated.
    ///
    /// True when the id is absent, no artifact exists, the artifact is
    /// unreadable or lacks `updated_at`, the artifact records a different id,
    /// or the source was modified at or after `updated_at`. Read failures are
    /// logged, never returned.
    pub fn should_regenerate(&self, id: Option<&str>, source_modified: DateTime<Utc>) -> bool {
        let Some(id) = id else {
            return true;
        };

        let path = self.json_path(&Self::artifact_key(Some(id)));
        if !path.exists() {
            return true;
        }

        match read_stamp(&path) {
            Ok(ArtifactStamp {
                id: Some(stored), ..
            }) if stored.trim() != id.trim() => {
                warn!(
                    path = %path.display(),
                    stored = %stored,
                    id,
                    "artifact belongs to another id, regenerating"
                );
                true
            }
            Ok(ArtifactStamp {
                updated_at: Some(updated_at),
                ..
            }) => source_modified >= updated_at,
            Ok(ArtifactStamp {
                updated_at: None, ..
            }) => {
                debug!(path = %path.display(), "artifact has no updated_at, regenerating");
                true
            }
            Err(e) => {
                warn!(error = %e, "existing artifact unreadable, regenerating");
                true
            }
        }
    }

    /// Persist a generation as `<key>.json` and `<key>.txt`.
    ///
    /// Reasoning blocks are moved out of the response into `reasoning`.
    /// Existing files for the same key are replaced.
    #[instrument(skip_all, fields(id = record.id.as_deref().unwrap_or("<unnamed>")))]
    pub fn save(&self, record: GenerationRecord) -> Result<SavedArtifact> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| PromptBatchError::io(&self.output_dir, e))?;

        let key = Self::artifact_key(record.id.as_deref());

        let reasoning = extract_first(&record.generated_text, THINK_TAGS, MatchPolicy::Lazy)
            .filter(|r| !r.is_empty());
        let response = strip_all(&record.generated_text, THINK_TAGS, MatchPolicy::Lazy)
            .trim()
            .to_string();

        let words = response.split_whitespace().count();
        let secs = record.duration.as_secs_f64();
        let words_per_second = if secs > 0.0 { words as f64 / secs } else { 0.0 };

        let artifact = ResultArtifact {
            schema_version: CURRENT_SCHEMA_VERSION,
            id: record.id,
            prompt: record.prompt,
            prompt_sha256: sha256_hex(&record.assembled_prompt),
            assembled_prompt: record.assembled_prompt,
            reasoning,
            metrics: Some(ArtifactMetrics {
                started_at: record.started_at,
                duration_ms: u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX),
                response_chars: record.response_chars,
                words,
                words_per_second,
            }),
            backend: Some(record.backend),
            model: record.model,
            updated_at: Some(Utc::now()),
            response,
        };

        let json = serde_json::to_string_pretty(&artifact).map_err(|e| {
            PromptBatchError::validation(format!("JSON serialization failed: {e}"))
        })?;

        // The JSON file is the staleness marker, so it lands last.
        let text_path = self.text_path(&key);
        let json_path = self.json_path(&key);
        write_atomic(&text_path, render_clean_text(&artifact.response).as_bytes())?;
        write_atomic(&json_path, json.as_bytes())?;

        debug!(key = %key, path = %json_path.display(), words, "artifact saved");

        Ok(SavedArtifact {
            key,
            json_path,
            text_path,
            artifact,
        })
    }

    /// Read one artifact back.
    pub fn load(&self, key: &str) -> Result<ResultArtifact> {
        let path = self.json_path(key);
        let content = std::fs::read_to_string(&path).map_err(|e| PromptBatchError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| PromptBatchError::ResultReadCorrupt {
            path,
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_stamp(path: &Path) -> Result<ArtifactStamp> {
    let corrupt = |message: String| PromptBatchError::ResultReadCorrupt {
        path: path.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))
}

/// Plain-text rendering: generation tokens removed, `<article>` content
/// preferred when present.
pub fn render_clean_text(response: &str) -> String {
    let cleaned = GENERATION_TOKENS
        .iter()
        .fold(response.to_string(), |text, token| text.replace(token, ""));

    extract_first(&cleaned, ARTICLE_TAGS, MatchPolicy::Lazy)
        .unwrap_or_else(|| cleaned.trim().to_string())
}

/// Ids become file stems: anything outside `[A-Za-z0-9._-]` turns into `_`,
/// and leading dots are replaced so keys never name hidden files. A stem that
/// differs from the id carries the first 8 hex digits of the id's SHA-256.
fn sanitize_key(id: &str) -> String {
    let id = id.trim();
    let key: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let dots = key.len() - key.trim_start_matches('.').len();
    let key = format!("{}{}", "_".repeat(dots), &key[dots..]);

    if key.is_empty() || key == id {
        key
    } else {
        format!("{key}-{}", &sha256_hex(id)[..8])
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write to a hidden temp file beside `path`, then rename over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{name}.{}.tmp", Uuid::now_v7().simple()));

    std::fs::write(&temp, bytes).map_err(|e| PromptBatchError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        PromptBatchError::io(path, e)
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
