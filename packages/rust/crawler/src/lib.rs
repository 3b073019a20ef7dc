//! Catalog client, paced work queue, and catalog crawl.
//!
//! This crate provides:
//! - [`CatalogClient`]: one GET per call, 404 mapped to absence
//! - [`Scheduler`]: one dispatch per tick, drain detection, abort on first failure
//! - [`CatalogCrawler`]: listing → styles → rating fan-out into a catalog tree

pub mod client;
pub mod crawl;
pub mod endpoints;
pub mod job;
pub mod scheduler;

pub use client::{CatalogClient, CatalogFetch};
pub use crawl::{CatalogCrawl, CatalogCrawler, CrawlOutcome, CrawlTask, ModelRef};
pub use job::{ImportJob, JobState};
pub use scheduler::{CrawlPlan, Scheduler, WorkQueue};
