//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use catalogsync_artifacts::ArtifactStore;
use catalogsync_core::{
    ProgressReporter, RefreshOrchestrator, RefreshReport, load_template, map_catalog,
};
use catalogsync_crawler::{CatalogClient, CatalogCrawler};
use catalogsync_shared::{
    AppConfig, ArtifactPaths, CatalogConfig, CatalogSyncError, RefreshConfig, init_config,
    load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// catalogsync: keep a vehicle tradeoff problem in sync with the catalog.
#[derive(Parser)]
#[command(
    name = "catalogsync",
    version,
    about = "Crawl a vehicle catalog and publish it as a decision-problem document.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.catalogsync/catalogsync.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also append logs to a dated `import-YYYY-MM-DD.log` in this directory.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Overrides for the `[catalog]` config section.
#[derive(Args, Default)]
pub(crate) struct CatalogArgs {
    /// Catalog model year to crawl.
    #[arg(long)]
    pub year: Option<u32>,

    /// Milliseconds between request dispatches.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Catalog service base URL.
    #[arg(long)]
    pub base_url: Option<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Keep the problem document fresh until interrupted.
    Serve {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Crawl the catalog and rewrite the problem document now.
    Refresh {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Print the time of the last successful refresh.
    LastRefresh,

    /// Map a stored raw snapshot to a problem document without crawling.
    Map {
        /// Raw snapshot to read (defaults to the configured raw path).
        #[arg(long)]
        raw: Option<PathBuf>,

        /// Write the document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = match cli.verbose {
        0 => "catalogsync=info",
        1 => "catalogsync=debug",
        _ => "catalogsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let stderr = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let file = match &cli.log_dir {
        Some(dir) => {
            let path = log_file_path(dir, Utc::now());
            std::fs::create_dir_all(dir).map_err(|e| CatalogSyncError::io(dir, e))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| CatalogSyncError::io(&path, e))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr)
        .with(file)
        .init();
    Ok(())
}

/// `<dir>/import-YYYY-MM-DD.log` for the day of `now`.
fn log_file_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("import-{}.log", now.format("%Y-%m-%d")))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve { catalog } => cmd_serve(&resolve_config(config_path, &catalog)?).await,
        Command::Refresh { catalog } => cmd_refresh(&resolve_config(config_path, &catalog)?).await,
        Command::LastRefresh => cmd_last_refresh(&resolve_config(config_path, &CatalogArgs::default())?),
        Command::Map { raw, out } => cmd_map(
            &resolve_config(config_path, &CatalogArgs::default())?,
            raw,
            out.as_deref(),
        ),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config file and apply command-line overrides.
fn resolve_config(path: Option<&Path>, overrides: &CatalogArgs) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    if let Some(year) = overrides.year {
        config.catalog.year = year;
    }
    if let Some(ms) = overrides.interval_ms {
        config.catalog.request_interval_ms = ms;
    }
    if let Some(url) = &overrides.base_url {
        config.catalog.base_url = url.clone();
    }
    Ok(config)
}

/// Build the orchestrator. Fails early when the API key is missing.
fn build_orchestrator(
    config: &AppConfig,
    progress: Option<Arc<dyn ProgressReporter>>,
) -> Result<Arc<RefreshOrchestrator<CatalogClient>>> {
    let catalog = CatalogConfig::from_app(config)?;
    let client = Arc::new(CatalogClient::new(&catalog)?);
    let crawler = CatalogCrawler::new(client, &catalog);
    let store = ArtifactStore::new(ArtifactPaths::from(config));

    let mut orchestrator = RefreshOrchestrator::new(crawler, store, RefreshConfig::from(config));
    if let Some(progress) = progress {
        orchestrator = orchestrator.with_progress(progress);
    }
    Ok(Arc::new(orchestrator))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config, None)?;

    info!(
        year = config.catalog.year,
        staleness_threshold_secs = config.refresh.staleness_threshold_secs,
        check_interval_secs = config.refresh.check_interval_secs,
        "serving"
    );
    let checker = orchestrator.spawn_periodic_check();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl-C: {e}"))?;

    info!(refresh_running = orchestrator.is_running(), "shutting down");
    checker.abort();
    Ok(())
}

async fn cmd_refresh(config: &AppConfig) -> Result<()> {
    let progress: Arc<dyn ProgressReporter> = Arc::new(CliProgress::new());
    let orchestrator = build_orchestrator(config, Some(progress))?;

    let handle = orchestrator
        .trigger_refresh()
        .ok_or_else(|| eyre!("a refresh is already running"))?;
    let report = handle
        .await
        .map_err(|e| eyre!("refresh task failed: {e}"))??;

    println!();
    println!("  Problem document refreshed!");
    println!("  Job:        {}", report.job.id);
    println!("  Requests:   {}", report.job.completed);
    println!("  Options:    {}", report.options);
    println!("  Duplicates: {}", report.duplicates);
    println!("  Document:   {}", config.artifacts.document_path);
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn cmd_last_refresh(config: &AppConfig) -> Result<()> {
    let store = ArtifactStore::new(ArtifactPaths::from(config));
    let last = store.last_refresh();
    if last == DateTime::<Utc>::UNIX_EPOCH {
        println!("{} (never refreshed)", last.to_rfc3339());
    } else {
        println!("{}", last.to_rfc3339());
    }
    Ok(())
}

fn cmd_map(config: &AppConfig, raw: Option<PathBuf>, out: Option<&Path>) -> Result<()> {
    let mut paths = ArtifactPaths::from(config);
    if let Some(raw) = raw {
        paths.raw_path = raw;
    }
    let store = ArtifactStore::new(paths);

    let makes = store.read_raw()?;
    let template = load_template(&store.paths().template_path)?;
    let outcome = map_catalog(&makes, &template);

    let json = serde_json::to_string_pretty(&outcome.document)
        .map_err(|e| CatalogSyncError::validation(format!("JSON serialization failed: {e}")))?;
    match out {
        Some(path) => {
            std::fs::write(path, &json).map_err(|e| CatalogSyncError::io(path, e))?;
            info!(
                path = %path.display(),
                options = outcome.document.options.len(),
                duplicates = outcome.duplicates.len(),
                "problem document written"
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path, &CatalogArgs::default())?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &RefreshReport) {
        self.spinner.finish_and_clear();
    }

    fn failed(&self, error: &CatalogSyncError) {
        self.spinner.abandon_with_message(format!("Refresh failed: {error}"));
    }
}
