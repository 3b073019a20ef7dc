//! Refresh orchestration: crawl → raw snapshot → map → problem document.
//!
//! At most one refresh runs at a time. Triggers that arrive while a refresh
//! is running are dropped, not queued. A periodic check starts a refresh
//! whenever the persisted document is older than the staleness threshold.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use catalogsync_artifacts::ArtifactStore;
use catalogsync_crawler::{CatalogCrawler, CatalogFetch, ImportJob};
use catalogsync_shared::{CatalogSyncError, RefreshConfig, Result};

use crate::mapper::{load_template, map_catalog};

/// Summary of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub job: ImportJob,
    pub refreshed_at: DateTime<Utc>,
    /// Options in the written document.
    pub options: usize,
    /// Styles dropped because their id was already mapped.
    pub duplicates: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting refresh status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the refresh completes.
    fn done(&self, report: &RefreshReport);
    /// Called when the refresh fails. Nothing has been persisted past the
    /// failing step.
    fn failed(&self, error: &CatalogSyncError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &RefreshReport) {}
    fn failed(&self, _error: &CatalogSyncError) {}
}

/// Clears the in-flight flag when the refresh task ends, however it ends.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight refresh driver.
pub struct RefreshOrchestrator<F> {
    crawler: CatalogCrawler<F>,
    store: ArtifactStore,
    config: RefreshConfig,
    progress: Arc<dyn ProgressReporter>,
    running: Arc<AtomicBool>,
}

impl<F: CatalogFetch> RefreshOrchestrator<F> {
    pub fn new(crawler: CatalogCrawler<F>, store: ArtifactStore, config: RefreshConfig) -> Self {
        Self {
            crawler,
            store,
            config,
            progress: Arc::new(SilentProgress),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Time of the last successful refresh; the Unix epoch if there was none.
    pub fn last_refresh_time(&self) -> DateTime<Utc> {
        self.store.last_refresh()
    }

    /// Whether the persisted document is older than the staleness threshold.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.last_refresh_time());
        match chrono::Duration::from_std(self.config.staleness_threshold) {
            Ok(threshold) => age > threshold,
            Err(_) => false,
        }
    }

    /// Start a refresh if the document is stale and none is running.
    pub fn check_staleness(self: &Arc<Self>) -> Option<JoinHandle<Result<RefreshReport>>> {
        if self.is_running() {
            debug!("refresh running, staleness check skipped");
            return None;
        }
        if !self.is_stale() {
            debug!(last_refresh = %self.last_refresh_time(), "document is fresh");
            return None;
        }
        info!(last_refresh = %self.last_refresh_time(), "document is stale");
        self.trigger_refresh()
    }

    /// Start a refresh now. Returns `None` if one is already running.
    pub fn trigger_refresh(self: &Arc<Self>) -> Option<JoinHandle<Result<RefreshReport>>> {
        let Some(flight) = FlightGuard::acquire(&self.running) else {
            info!("refresh already running, trigger dropped");
            return None;
        };

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _flight = flight;
            let result = this.run_refresh().await;
            if let Err(e) = &result {
                warn!(error = %e, "refresh failed, previous document kept");
                this.progress.failed(e);
            }
            result
        }))
    }

    /// Check immediately, then every `check_interval`, for the life of the task.
    pub fn spawn_periodic_check(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let period = this.config.check_interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            info!(
                interval_secs = this.config.check_interval.as_secs(),
                "periodic staleness check started"
            );
            loop {
                ticker.tick().await;
                // The refresh reports its own outcome; the handle is not needed.
                drop(this.check_staleness());
            }
        })
    }

    #[instrument(skip_all)]
    async fn run_refresh(&self) -> Result<RefreshReport> {
        let start = Instant::now();
        info!("refresh started");

        self.progress.phase("Crawling catalog");
        let outcome = self.crawler.crawl().await?;

        self.progress.phase("Writing raw snapshot");
        self.store.write_raw(&outcome.makes)?;

        self.progress.phase("Mapping catalog");
        let template = load_template(&self.store.paths().template_path)?;
        let mapped = map_catalog(&outcome.makes, &template);

        self.progress.phase("Writing problem document");
        let stamp = self
            .store
            .write_document(&mapped.document, outcome.job.id, Utc::now())?;

        let report = RefreshReport {
            job: outcome.job,
            refreshed_at: stamp.refreshed_at,
            options: stamp.option_count,
            duplicates: mapped.duplicates.len(),
            elapsed: start.elapsed(),
        };
        info!(
            job_id = %report.job.id,
            options = report.options,
            duplicates = report.duplicates,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "refresh complete"
        );
        self.progress.done(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use catalogsync_crawler::{CatalogClient, JobState};
    use catalogsync_shared::{AppConfig, ArtifactPaths, CatalogConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEMPLATE: &str = r#"{
        "subject": "autos",
        "columns": [
            { "key": "price", "type": "numeric", "is_objective": true, "goal": "min" },
            { "key": "MPGCombined", "type": "numeric", "is_objective": true, "goal": "max" }
        ]
    }"#;

    struct Fixture {
        dir: PathBuf,
        store: ArtifactStore,
        orchestrator: Arc<RefreshOrchestrator<CatalogClient>>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn fixture(server: &MockServer, with_template: bool) -> Fixture {
        fixture_with_progress(server, with_template, Arc::new(SilentProgress))
    }

    fn fixture_with_progress(
        server: &MockServer,
        with_template: bool,
        progress: Arc<dyn ProgressReporter>,
    ) -> Fixture {
        let dir = std::env::temp_dir().join(format!("cs-refresh-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let paths = ArtifactPaths {
            raw_path: dir.join("cars_raw.json"),
            document_path: dir.join("auto.json"),
            template_path: dir.join("problem.template.json"),
        };
        if with_template {
            std::fs::write(&paths.template_path, TEMPLATE).unwrap();
        }

        let mut app = AppConfig::default();
        app.catalog.base_url = server.uri();
        app.catalog.request_interval_ms = 5;
        app.catalog.request_timeout_secs = 5;
        let catalog = CatalogConfig::with_api_key(&app, "test-key").unwrap();
        let client = Arc::new(CatalogClient::new(&catalog).unwrap());

        let store = ArtifactStore::new(paths);
        let orchestrator = RefreshOrchestrator::new(
            CatalogCrawler::new(client, &catalog),
            store.clone(),
            RefreshConfig {
                staleness_threshold: Duration::from_secs(3600),
                check_interval: Duration::from_millis(50),
            },
        )
        .with_progress(progress);
        Fixture {
            dir,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }

    async fn mount_catalog(server: &MockServer, expected_listings: u64) {
        Mock::given(method("GET"))
            .and(path("/api/vehicle/v2/makes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "makes": [{
                    "name": "Acura",
                    "niceName": "acura",
                    "models": [{ "name": "ILX", "niceName": "ilx", "years": [{ "year": 2016 }] }]
                }]
            })))
            .expect(expected_listings)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/vehicle/v2/acura/ilx/2016/styles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "styles": [{
                    "id": 200753409,
                    "name": "4dr Sedan",
                    "price": { "baseMSRP": 27900 },
                    "MPG": { "highway": "40", "city": "30" }
                }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/vehiclereviews/v2/acura/ilx/2016"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn done(&self, _report: &RefreshReport) {
            self.phases.lock().unwrap().push("done".into());
        }
        fn failed(&self, _error: &CatalogSyncError) {
            self.phases.lock().unwrap().push("failed".into());
        }
    }

    #[tokio::test]
    async fn refresh_persists_snapshot_document_and_stamp() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);
        assert_eq!(fx.orchestrator.last_refresh_time(), DateTime::<Utc>::UNIX_EPOCH);

        let report = fx.orchestrator.trigger_refresh().unwrap().await.unwrap().unwrap();

        assert_eq!(report.job.state, JobState::Succeeded);
        assert_eq!(report.options, 1);
        assert_eq!(fx.orchestrator.last_refresh_time(), report.refreshed_at);
        assert!(!fx.orchestrator.is_running());

        let raw = fx.store.read_raw().unwrap();
        assert_eq!(raw[0].models[0].retained_style().map(|s| s.id), Some(200753409));
        let doc = fx.store.read_document().unwrap().unwrap();
        assert_eq!(doc.options[0].values["MPGCombined"], Some(35.0));
        assert_eq!(doc.options[0].values["averageRating"], None);
    }

    #[tokio::test]
    async fn second_trigger_while_running_is_dropped() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);

        let first = fx.orchestrator.trigger_refresh();
        let second = fx.orchestrator.trigger_refresh();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(fx.orchestrator.is_running());

        first.unwrap().await.unwrap().unwrap();
        assert!(!fx.orchestrator.is_running());
        // expect(1) on the listing mock is verified when the server drops
    }

    #[tokio::test]
    async fn staleness_check_starts_one_refresh() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);
        assert!(fx.orchestrator.is_stale());

        let handle = fx.orchestrator.check_staleness().expect("stale document should refresh");
        assert!(fx.orchestrator.check_staleness().is_none(), "no-op while running");
        handle.await.unwrap().unwrap();

        assert!(!fx.orchestrator.is_stale());
        assert!(fx.orchestrator.check_staleness().is_none(), "fresh document is left alone");
    }

    fn previous_document() -> catalogsync_shared::ProblemDocument {
        serde_json::from_str(TEMPLATE).unwrap()
    }

    #[tokio::test]
    async fn stamped_document_past_threshold_is_refreshed() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);

        let recent = Utc::now() - chrono::Duration::minutes(10);
        fx.store
            .write_document(&previous_document(), uuid::Uuid::now_v7(), recent)
            .unwrap();
        assert!(!fx.orchestrator.is_stale());
        assert!(fx.orchestrator.check_staleness().is_none());

        let old = Utc::now() - chrono::Duration::hours(2);
        fx.store
            .write_document(&previous_document(), uuid::Uuid::now_v7(), old)
            .unwrap();
        assert!(fx.orchestrator.is_stale());

        let report = fx
            .orchestrator
            .check_staleness()
            .expect("old document should refresh")
            .await
            .unwrap()
            .unwrap();
        assert!(report.refreshed_at > old);
        assert_eq!(fx.orchestrator.last_refresh_time(), report.refreshed_at);
        assert_eq!(fx.store.read_document().unwrap().unwrap().options.len(), 1);
    }

    #[tokio::test]
    async fn unstamped_document_with_old_mtime_is_refreshed() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);

        let document_path = &fx.store.paths().document_path;
        std::fs::write(document_path, TEMPLATE).unwrap();
        let two_hours_ago = std::time::SystemTime::now() - Duration::from_secs(2 * 3600);
        std::fs::File::options()
            .write(true)
            .open(document_path)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();
        assert!(!fx.store.stamp_path().exists());
        assert!(fx.orchestrator.last_refresh_time() > DateTime::<Utc>::UNIX_EPOCH);
        assert!(fx.orchestrator.is_stale());

        fx.orchestrator
            .check_staleness()
            .expect("old document should refresh")
            .await
            .unwrap()
            .unwrap();
        assert!(!fx.orchestrator.is_stale());
        assert!(fx.store.stamp_path().exists());
    }

    #[tokio::test]
    async fn failed_crawl_keeps_previous_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/vehicle/v2/makes"))
            .respond_with(ResponseTemplate::new(500).set_body_string("maintenance"))
            .mount(&server)
            .await;
        let progress = Arc::new(RecordingProgress::default());
        let fx = fixture_with_progress(&server, true, progress.clone());

        let previous = previous_document();
        let earlier = Utc::now() - chrono::Duration::days(2);
        fx.store
            .write_document(&previous, uuid::Uuid::now_v7(), earlier)
            .unwrap();
        let before = std::fs::read(&fx.store.paths().document_path).unwrap();

        let orchestrator = &fx.orchestrator;
        let err = orchestrator.trigger_refresh().unwrap().await.unwrap().unwrap_err();

        assert!(matches!(err, CatalogSyncError::Server { status: 500, .. }));
        assert_eq!(std::fs::read(&fx.store.paths().document_path).unwrap(), before);
        assert_eq!(orchestrator.last_refresh_time(), earlier);
        assert!(!fx.store.paths().raw_path.exists());
        assert!(!orchestrator.is_running());
        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec!["Crawling catalog".to_string(), "failed".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_template_fails_without_touching_document() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, false);

        let err = fx.orchestrator.trigger_refresh().unwrap().await.unwrap().unwrap_err();

        assert!(matches!(err, CatalogSyncError::MapperInputMissing { .. }));
        assert!(!fx.store.paths().document_path.exists());
        assert_eq!(fx.orchestrator.last_refresh_time(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn periodic_check_refreshes_at_startup() {
        let server = MockServer::start().await;
        mount_catalog(&server, 1).await;
        let fx = fixture(&server, true);

        let checker = fx.orchestrator.spawn_periodic_check();
        let deadline = Instant::now() + Duration::from_secs(10);
        while fx.orchestrator.last_refresh_time() == DateTime::<Utc>::UNIX_EPOCH {
            assert!(Instant::now() < deadline, "startup refresh did not complete");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Further ticks find a fresh document and start nothing.
        tokio::time::sleep(Duration::from_millis(150)).await;
        checker.abort();
        while fx.orchestrator.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
