//! Error types for promptbatch.
//!
//! Library crates use [`PromptBatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all promptbatch operations.
#[derive(Debug, thiserror::Error)]
pub enum PromptBatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a backend call.
    #[error("network error: {0}")]
    Network(String),

    /// Prompt record or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// One or more reference URLs could not be retrieved (strict fetch mode).
    #[error("failed to fetch reference context from: {}", .urls.join(", "))]
    ContextFetchFailed { urls: Vec<String> },

    /// The backend could not be reached at all.
    #[error("backend {host} unavailable: {message}")]
    BackendUnavailable { host: String, message: String },

    /// The backend answered, but with an error status or a malformed body.
    #[error("backend {host} error: {message}")]
    BackendError { host: String, message: String },

    /// An existing result artifact could not be read or parsed.
    #[error("unreadable result artifact {path:?}: {message}")]
    ResultReadCorrupt { path: PathBuf, message: String },

    /// The batch was empty after loading every source.
    #[error("no prompts found in any of the given sources")]
    NoTasksFound,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad record, invalid value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PromptBatchError>;

impl PromptBatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn backend_unavailable(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            host: host.into(),
            message: msg.into(),
        }
    }

    pub fn backend_error(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BackendError {
            host: host.into(),
            message: msg.into(),
        }
    }
}
