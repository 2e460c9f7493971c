//! Error taxonomy
//!
//! - `ParseError`: the source document is unreadable or has no bookmark container. Fatal to parse.
//! - `ClassificationBatchError`: one batch failed at the service. Never fatal, the orchestrator
//!   folds it into sentinel-categorized output.
//! - `ExportError`: the category tree could not be rendered or written. Fatal to export only.
//! - `StoreError` / `ConfigError`: persistence and configuration problems.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read bookmark file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no bookmark container (<DL>) found in document")]
    NoBookmarkContainer,

    #[error("invalid selector: {0}")]
    Selector(String),
}

#[derive(Debug, Error)]
pub enum ClassificationBatchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned no message content")]
    EmptyContent,

    #[error("could not extract a JSON array from the response: {0}")]
    MalformedPayload(String),
}

impl ClassificationBatchError {
    /// Network errors and 429/5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassificationBatchError::Request(_) => true,
            ClassificationBatchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no categorized bookmarks to export, run `categorize` first")]
    NothingToExport,

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access slot '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("slot '{key}' holds invalid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("API key is not configured, use `config set --api-key` or BOOKMARK_CATEGORIZER_API_KEY")]
    MissingApiKey,
}
