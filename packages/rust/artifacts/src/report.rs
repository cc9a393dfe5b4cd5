//! Reading a result directory back: prompt/response listings and merging
//! JSON responses into one file.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, instrument, warn};

use promptbatch_shared::{PromptBatchError, Result};

use crate::store::write_atomic;

/// One artifact as shown by the listing.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub file_name: String,
    pub prompt: String,
    pub response: String,
}

impl ListingEntry {
    /// Banner + `Prompt:` / `Response:` sections.
    pub fn render(&self) -> String {
        let rule = "#".repeat(40);
        format!(
            "{rule}\n# File: {}\n{rule}\nPrompt:\n{}\n\nResponse:\n{}\n",
            self.file_name, self.prompt, self.response
        )
    }
}

/// Everything found in a result directory.
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
    /// `(file name, reason)` for files that could not be read.
    pub errors: Vec<(String, String)>,
}

/// Outcome of [`merge_responses`].
#[derive(Debug)]
pub struct MergeReport {
    pub output_file: PathBuf,
    pub merged: usize,
    /// `(file name, reason)` for artifacts left out.
    pub skipped: Vec<(String, String)>,
}

/// `*.json` files in `dir`, sorted by name.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PromptBatchError::io(dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_value(path: &Path) -> std::result::Result<Value, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| format!("failed to decode JSON: {e}"))
}

/// Prompt and response of every artifact in `dir`.
///
/// Artifacts missing either field show a placeholder; unreadable files are
/// collected in [`Listing::errors`].
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn read_listing(dir: &Path) -> Result<Listing> {
    let mut listing = Listing::default();

    for path in json_files(dir)? {
        let name = file_name(&path);
        match read_value(&path) {
            Ok(value) => {
                let field = |key: &str, fallback: &str| {
                    value
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or(fallback)
                        .to_string()
                };
                listing.entries.push(ListingEntry {
                    prompt: field("prompt", "No prompt found"),
                    response: field("response", "No response found"),
                    file_name: name,
                });
            }
            Err(reason) => {
                warn!(file = %name, %reason, "skipping unreadable artifact");
                listing.errors.push((name, reason));
            }
        }
    }

    Ok(listing)
}

/// Parse each artifact's `response` as JSON and write them all to
/// `output_file` as one pretty-printed array.
#[instrument(skip_all, fields(input = %input_dir.display(), output = %output_file.display()))]
pub fn merge_responses(input_dir: &Path, output_file: &Path) -> Result<MergeReport> {
    let mut merged = Vec::new();
    let mut skipped = Vec::new();

    for path in json_files(input_dir)? {
        let name = file_name(&path);
        let parsed = read_value(&path).and_then(|value| {
            let response = value
                .get("response")
                .and_then(Value::as_str)
                .ok_or_else(|| "no response field".to_string())?;
            serde_json::from_str::<Value>(response)
                .map_err(|e| format!("response is not JSON: {e}"))
        });

        match parsed {
            Ok(value) => merged.push(value),
            Err(reason) => {
                warn!(file = %name, %reason, "skipping artifact");
                skipped.push((name, reason));
            }
        }
    }

    let json = serde_json::to_string_pretty(&merged).map_err(|e| {
        PromptBatchError::validation(format!("JSON serialization failed: {e}"))
    })?;

    if let Some(parent) = output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PromptBatchError::io(parent, e))?;
    }
    write_atomic(output_file, json.as_bytes())?;

    info!(merged = merged.len(), skipped = skipped.len(), "responses merged");

    Ok(MergeReport {
        output_file: output_file.to_path_buf(),
        merged: merged.len(),
        skipped,
    })
}
