//! Shared types, error model, and configuration for catalogsync.
//!
//! This crate is the foundation depended on by all other catalogsync crates.
//! It provides:
//! - [`CatalogSyncError`], the unified error type
//! - Catalog tree types ([`Make`], [`Model`], [`Style`], ...)
//! - The problem document model ([`ProblemDocument`])
//! - Configuration ([`AppConfig`], [`CatalogConfig`], config loading)

pub mod config;
pub mod error;
pub mod problem;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArtifactPaths, ArtifactsSection, CatalogConfig, CatalogSection, RefreshConfig,
    RefreshSection, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_api_key,
};
pub use error::{CatalogSyncError, Result};
pub use problem::{Column, ColumnType, Goal, ProblemDocument, ProblemOption};
pub use types::{
    Engine, Make, Measure, Model, ModelYear, Mpg, Price, Rating, Style, StyleId, measure,
    number_from_value,
};
