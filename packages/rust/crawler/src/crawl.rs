//! Catalog crawl: listing, then styles per model, then rating per style.
//!
//! One listing request returns every make and model for the configured year.
//! Each model gets a styles request; when it has at least one style, the
//! first is kept (colors stripped) and a rating request follows. A model with
//! no styles ends its branch. All requests go through the paced
//! [`Scheduler`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use catalogsync_shared::{CatalogConfig, CatalogSyncError, Make, Model, Rating, Result, Style};

use crate::client::CatalogFetch;
use crate::endpoints::{listing_path, rating_path, styles_path};
use crate::job::ImportJob;
use crate::scheduler::{CrawlPlan, Scheduler};

/// Position of a model in the listing tree, plus its URL slugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub make: usize,
    pub model: usize,
    pub make_slug: String,
    pub model_slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTask {
    Listing,
    Styles(ModelRef),
    Rating(ModelRef),
}

#[derive(Deserialize)]
struct ListingResponse {
    makes: Vec<Make>,
}

#[derive(Deserialize)]
struct StylesResponse {
    #[serde(default)]
    styles: Vec<Value>,
}

// ---------------------------------------------------------------------------
// CatalogCrawl
// ---------------------------------------------------------------------------

/// The crawl plan. Owns the tree while it is being filled in.
#[derive(Debug)]
pub struct CatalogCrawl {
    year: u32,
    makes: Vec<Make>,
}

impl CatalogCrawl {
    pub fn new(year: u32) -> Self {
        Self {
            year,
            makes: Vec::new(),
        }
    }

    pub fn into_makes(self) -> Vec<Make> {
        self.makes
    }

    fn model_mut(&mut self, r: &ModelRef) -> Result<&mut Model> {
        self.makes
            .get_mut(r.make)
            .and_then(|make| make.models.get_mut(r.model))
            .ok_or_else(|| {
                CatalogSyncError::crawl(format!(
                    "response for unknown model {}/{}",
                    r.make_slug, r.model_slug
                ))
            })
    }

    fn on_listing(&mut self, payload: Option<Value>) -> Result<Vec<CrawlTask>> {
        let payload = payload.ok_or_else(|| {
            CatalogSyncError::crawl(format!(
                "error obtaining car models: no listing for year {}",
                self.year
            ))
        })?;
        let listing: ListingResponse = serde_json::from_value(payload)
            .map_err(|e| CatalogSyncError::parse(format!("listing: {e}")))?;
        self.makes = listing.makes;

        let tasks: Vec<CrawlTask> = self
            .makes
            .iter()
            .enumerate()
            .flat_map(|(mi, make)| {
                make.models.iter().enumerate().map(move |(di, model)| {
                    CrawlTask::Styles(ModelRef {
                        make: mi,
                        model: di,
                        make_slug: make.nice_name.clone(),
                        model_slug: model.nice_name.clone(),
                    })
                })
            })
            .collect();

        info!(makes = self.makes.len(), models = tasks.len(), "listing received");
        Ok(tasks)
    }

    fn on_styles(&mut self, r: ModelRef, payload: Option<Value>) -> Result<Vec<CrawlTask>> {
        let Some(payload) = payload else {
            info!(make = %r.make_slug, model = %r.model_slug, "no styles found");
            return Ok(Vec::new());
        };
        let response: StylesResponse = serde_json::from_value(payload).map_err(|e| {
            CatalogSyncError::parse(format!("styles for {}/{}: {e}", r.make_slug, r.model_slug))
        })?;

        let total = response.styles.len();
        let Some(first) = response.styles.into_iter().next() else {
            info!(make = %r.make_slug, model = %r.model_slug, "no styles found");
            return Ok(Vec::new());
        };
        // Only the retained style is parsed.
        let mut style: Style = serde_json::from_value(first).map_err(|e| {
            CatalogSyncError::parse(format!("style for {}/{}: {e}", r.make_slug, r.model_slug))
        })?;
        style.strip_colors();
        debug!(
            make = %r.make_slug,
            model = %r.model_slug,
            style_id = style.id,
            discarded = total - 1,
            "style retained"
        );

        let year = self.year;
        self.model_mut(&r)?.retain_style(style, year);
        Ok(vec![CrawlTask::Rating(r)])
    }

    fn on_rating(&mut self, r: ModelRef, payload: Option<Value>) -> Result<Vec<CrawlTask>> {
        let Some(payload) = payload else {
            debug!(make = %r.make_slug, model = %r.model_slug, "no rating");
            return Ok(Vec::new());
        };
        let mut rating: Rating = serde_json::from_value(payload).map_err(|e| {
            CatalogSyncError::parse(format!("rating for {}/{}: {e}", r.make_slug, r.model_slug))
        })?;
        rating.strip_reviews();

        match self.model_mut(&r)?.retained_style_mut() {
            Some(style) => style.rating = Some(rating),
            None => warn!(make = %r.make_slug, model = %r.model_slug, "rating without a retained style"),
        }
        Ok(Vec::new())
    }
}

impl CrawlPlan for CatalogCrawl {
    type Task = CrawlTask;

    fn path(&self, task: &CrawlTask) -> String {
        match task {
            CrawlTask::Listing => listing_path(self.year),
            CrawlTask::Styles(r) => styles_path(&r.make_slug, &r.model_slug, self.year),
            CrawlTask::Rating(r) => rating_path(&r.make_slug, &r.model_slug, self.year),
        }
    }

    fn resume(&mut self, task: CrawlTask, payload: Option<Value>) -> Result<Vec<CrawlTask>> {
        match task {
            CrawlTask::Listing => self.on_listing(payload),
            CrawlTask::Styles(r) => self.on_styles(r, payload),
            CrawlTask::Rating(r) => self.on_rating(r, payload),
        }
    }
}

// ---------------------------------------------------------------------------
// CatalogCrawler
// ---------------------------------------------------------------------------

/// A completed crawl: the filled-in tree and its job record.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub makes: Vec<Make>,
    pub job: ImportJob,
}

/// Runs complete catalog crawls for one model year.
pub struct CatalogCrawler<F> {
    scheduler: Scheduler<F>,
    year: u32,
}

impl<F: CatalogFetch> CatalogCrawler<F> {
    pub fn new(fetcher: Arc<F>, config: &CatalogConfig) -> Self {
        Self {
            scheduler: Scheduler::new(fetcher, config.request_interval),
            year: config.year,
        }
    }

    /// Crawl the whole catalog. On failure the partial tree is discarded.
    #[instrument(skip_all, fields(year = self.year))]
    pub async fn crawl(&self) -> Result<CrawlOutcome> {
        let mut job = ImportJob::new();
        job.start();
        info!(job_id = %job.id, "crawl started");

        let mut plan = CatalogCrawl::new(self.year);
        match self
            .scheduler
            .run(&mut plan, vec![CrawlTask::Listing], &mut job)
            .await
        {
            Ok(()) => {
                job.succeed();
                let makes = plan.into_makes();
                let styles = makes
                    .iter()
                    .flat_map(|m| &m.models)
                    .filter(|m| m.retained_style().is_some())
                    .count();
                info!(
                    job_id = %job.id,
                    makes = makes.len(),
                    styles,
                    requests = job.completed,
                    "crawl finished"
                );
                Ok(CrawlOutcome { makes, job })
            }
            Err(e) => {
                job.fail();
                warn!(
                    job_id = %job.id,
                    dispatched = job.dispatched,
                    completed = job.completed,
                    error = %e,
                    "crawl failed"
                );
                Err(e)
            }
        }
    }
}
