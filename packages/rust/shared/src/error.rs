//! Error types for catalogsync.
//!
//! Library crates use [`CatalogSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all catalogsync operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network-level failure talking to the catalog service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The catalog service answered with a status other than 200 or 404.
    #[error("server error: HTTP {status} from {url}: {body}")]
    Server {
        status: u16,
        url: String,
        body: String,
    },

    /// A catalog payload did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The crawl was aborted and its partial results discarded.
    #[error("crawl aborted: {message}")]
    Crawl { message: String },

    /// The problem template could not be read or parsed.
    #[error("mapper input missing at {path:?}: {message}")]
    MapperInputMissing { path: PathBuf, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (serialization, malformed artifact, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CatalogSyncError>;

impl CatalogSyncError {
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

    /// Create a crawl-abort error from any displayable message.
    pub fn crawl(msg: impl Into<String>) -> Self {
        Self::Crawl {
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

    /// Template could not be loaded for mapping.
    pub fn mapper_input(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::MapperInputMissing {
            path: path.into(),
            message: msg.into(),
        }
    }
}
