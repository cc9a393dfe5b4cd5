//! Batch loading: prompt records from JSON, JSON Lines and directories.
//!
//! A `.json` file holds one record or an array of records; any other file is
//! read as JSON Lines. Directories contribute their `*.json` / `*.jsonl` files
//! in name order. A file reached through more than one path is read once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use promptbatch_shared::{PromptBatchError, Result, Task};

/// One prompt record as written by users. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct PromptRecord {
    #[serde(default)]
    id: Option<RecordId>,
    content: String,
    #[serde(default)]
    system: Option<String>,
}

/// Ids may be written as strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordId {
    Text(String),
    Number(serde_json::Number),
}

impl RecordId {
    fn into_key(self) -> Option<String> {
        let key = match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        };
        (!key.is_empty()).then_some(key)
    }
}

/// Load every task from `paths`, in the given order.
///
/// Records without a `system` field use `default_system`. Fails with
/// [`PromptBatchError::NoTasksFound`] when nothing was loaded.
#[instrument(skip_all, fields(sources = paths.len()))]
pub fn load_tasks(paths: &[PathBuf], default_system: &str) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        let files = if path.is_dir() {
            prompt_files_in(path)?
        } else {
            vec![path.clone()]
        };

        for file in files {
            let identity = std::fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
            if !seen.insert(identity) {
                debug!(path = %file.display(), "prompt file already loaded, skipping");
                continue;
            }
            tasks.extend(load_file(&file, default_system)?);
        }
    }

    if tasks.is_empty() {
        return Err(PromptBatchError::NoTasksFound);
    }

    let mut ids = HashSet::new();
    for task in &tasks {
        let Some(id) = task.id.as_deref() else {
            continue;
        };
        if !ids.insert(id) {
            warn!(
                id,
                source = %task.source.display(),
                "duplicate prompt id, artifacts will overwrite each other"
            );
        }
    }

    info!(total = tasks.len(), "prompts loaded");
    Ok(tasks)
}

/// Load the records of a single file.
pub fn load_file(path: &Path, default_system: &str) -> Result<Vec<Task>> {
    let metadata = std::fs::metadata(path).map_err(|e| PromptBatchError::io(path, e))?;
    let source_modified: DateTime<Utc> = metadata
        .modified()
        .map_err(|e| PromptBatchError::io(path, e))?
        .into();

    let content = std::fs::read_to_string(path).map_err(|e| PromptBatchError::io(path, e))?;

    let records = if is_json_file(path) {
        parse_json(path, &content)?
    } else {
        parse_jsonl(path, &content)?
    };

    debug!(path = %path.display(), records = records.len(), "loaded prompt file");

    records
        .into_iter()
        .map(|(label, record)| {
            if record.content.trim().is_empty() {
                return Err(PromptBatchError::validation(format!(
                    "{}: {label} has empty content",
                    path.display()
                )));
            }
            Ok(Task {
                id: record.id.and_then(RecordId::into_key),
                content: record.content,
                system_instruction: record
                    .system
                    .unwrap_or_else(|| default_system.to_string()),
                source_modified,
                source: path.to_path_buf(),
            })
        })
        .collect()
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// `*.json` and `*.jsonl` files directly inside `dir`, sorted by name.
fn prompt_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PromptBatchError::io(dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonl")
                })
        })
        .collect();
    files.sort();

    debug!(dir = %dir.display(), files = files.len(), "scanned prompt directory");
    Ok(files)
}

/// A whole-file JSON document: one record or an array of them.
fn parse_json(path: &Path, content: &str) -> Result<Vec<(String, PromptRecord)>> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| PromptBatchError::parse(format!("{}: {e}", path.display())))?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let label = format!("record {}", i + 1);
                record_from_value(path, &label, item).map(|r| (label, r))
            })
            .collect(),
        other => {
            let label = "record".to_string();
            record_from_value(path, &label, other).map(|r| vec![(label, r)])
        }
    }
}

/// One record per non-blank line.
fn parse_jsonl(path: &Path, content: &str) -> Result<Vec<(String, PromptRecord)>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let label = format!("line {}", i + 1);
            serde_json::from_str(line)
                .map(|r| (label.clone(), r))
                .map_err(|e| PromptBatchError::parse(format!("{}: {label}: {e}", path.display())))
        })
        .collect()
}

fn record_from_value(path: &Path, label: &str, value: Value) -> Result<PromptRecord> {
    serde_json::from_value(value)
        .map_err(|e| PromptBatchError::parse(format!("{}: {label}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/prompts")
            .join(name)
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pb-loader-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn jsonl_fixture_loads() {
        let tasks = load_tasks(&[fixture("batch.jsonl")], "default system").unwrap();
        assert_eq!(tasks.len(), 3);

        assert_eq!(tasks[0].id.as_deref(), Some("solar-basics"));
        assert_eq!(tasks[0].system_instruction, "default system");
        assert_eq!(tasks[1].id.as_deref(), Some("42"));
        assert_eq!(tasks[1].system_instruction, "You are a poet.");
        assert_eq!(tasks[2].id, None);
        assert!(tasks[2].source.ends_with("batch.jsonl"));
    }

    #[test]
    fn directory_loads_in_name_order() {
        let tasks = load_tasks(&[fixture("")], "").unwrap();
        // batch.jsonl sorts before single.json
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[3].id.as_deref(), Some("single"));
    }

    #[test]
    fn file_named_twice_loads_once() {
        let tmp = temp_dir();
        std::fs::write(tmp.join("a.jsonl"), "{\"id\": \"only\", \"content\": \"x\"}\n").unwrap();

        let paths = vec![tmp.clone(), tmp.join("."), tmp.join("a.jsonl"), tmp.join("./a.jsonl")];
        let tasks = load_tasks(&paths, "").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_deref(), Some("only"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn json_array_and_empty_id() {
        let tmp = temp_dir();
        let path = tmp.join("prompts.json");
        std::fs::write(
            &path,
            r#"[{"id": "", "content": "one"}, {"id": null, "content": "two", "role": "user"}]"#,
        )
        .unwrap();

        let tasks = load_file(&path, "").unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.id.is_none()));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn source_modified_is_file_mtime() {
        let tmp = temp_dir();
        let path = tmp.join("p.jsonl");
        std::fs::write(&path, "{\"content\": \"x\"}\n").unwrap();
        let mtime: DateTime<Utc> = std::fs::metadata(&path).unwrap().modified().unwrap().into();

        let tasks = load_file(&path, "").unwrap();
        assert_eq!(tasks[0].source_modified, mtime);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn blank_content_is_rejected() {
        let tmp = temp_dir();
        let path = tmp.join("bad.jsonl");
        std::fs::write(&path, "{\"content\": \"fine\"}\n{\"id\": \"b\", \"content\": \"  \"}\n").unwrap();

        let err = load_file(&path, "").unwrap_err();
        assert!(matches!(err, PromptBatchError::Validation { .. }));
        assert!(err.to_string().contains("line 2"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        let tmp = temp_dir();
        let path = tmp.join("bad.jsonl");
        std::fs::write(&path, "{\"content\": \"ok\"}\n{oops}\n").unwrap();

        let err = load_file(&path, "").unwrap_err();
        assert!(matches!(err, PromptBatchError::Parse { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_batch_is_an_error() {
        let tmp = temp_dir();
        std::fs::write(tmp.join("empty.jsonl"), "\n\n").unwrap();

        let err = load_tasks(&[tmp.clone()], "").unwrap_err();
        assert!(matches!(err, PromptBatchError::NoTasksFound));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
