//! Core domain logic for catalogsync.
//!
//! This crate turns a crawled catalog tree into the problem document
//! ([`mapper`]) and keeps that document fresh ([`refresh`]).

pub mod mapper;
pub mod refresh;

pub use mapper::{MapOutcome, combined_mpg, load_template, map_catalog};
pub use refresh::{ProgressReporter, RefreshOrchestrator, RefreshReport, SilentProgress};
