//! # KouranBot: power outage alerts for Mauritius
//!
//! Usage:
//!   kouran run                                     # Poll sources and notify subscribers
//!   kouran check                                   # One run, print the report
//!   kouran parse --source feed                     # Fetch and parse only, no storage
//!   kouran localities --input dump.json --output districts_localities.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kouran_core::{KouranConfig, MessageSender, OutageStore};
use kouran_monitor::{ChangeDetector, Monitor, SchedulerSettings, spawn_scheduler};
use kouran_notify::{NotificationDispatcher, SendLimiter, TelegramSender};
use kouran_sources::{CebSource, FeedSource, OutageSource, categorize};
use kouran_store::SqliteStore;
use kouran_store::seed::{build_locality_index, load_locality_file};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kouran", version, about = "⚡ KouranBot: scheduled power outage alerts")]
struct Cli {
    /// Config file (default: ~/.kouran/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the polling scheduler
    Run,
    /// Run the pipeline once and print the report
    Check,
    /// Fetch and parse one source without touching storage
    Parse {
        #[arg(long, value_enum, default_value_t = SourceKind::Ceb)]
        source: SourceKind,
    },
    /// Build the district/locality index from a dataset dump
    Localities {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Ceb,
    Feed,
}

fn load_config(path: Option<&Path>) -> Result<KouranConfig> {
    match path {
        Some(p) => {
            let mut config = KouranConfig::load_from(p)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(KouranConfig::load()?),
    }
}

fn build_sources(config: &KouranConfig) -> Vec<Arc<dyn OutageSource>> {
    let timeout = Duration::from_secs(config.sources.timeout_secs);
    let mut sources: Vec<Arc<dyn OutageSource>> = Vec::new();
    if config.sources.ceb_enabled {
        sources.push(Arc::new(CebSource::new(&config.sources.ceb_url, timeout)));
    }
    if config.sources.feed_enabled {
        sources.push(Arc::new(FeedSource::new(&config.sources.feed_url, timeout)));
    }
    sources
}

/// Open the store and load the locality seed file on first start.
fn open_store(config: &KouranConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.store.expanded_path())?;

    let seed_path = PathBuf::from(shellexpand::tilde(&config.store.localities_file).to_string());
    if seed_path.exists() {
        let index = load_locality_file(&seed_path)?;
        store.seed_localities(&index)?;
    } else {
        tracing::info!("No locality file at {}, skipping seed", seed_path.display());
    }
    Ok(Arc::new(store))
}

fn build_monitor(config: &KouranConfig, store: Arc<SqliteStore>, shutdown: watch::Receiver<bool>) -> Monitor {
    let store: Arc<dyn OutageStore> = store;
    let sender: Arc<dyn MessageSender> = Arc::new(TelegramSender::new(&config.telegram));
    let limiter = Arc::new(SendLimiter::per_second(config.dispatch.max_per_second));

    let detector = ChangeDetector::new(store.clone(), config.monitor.store_retries);
    let dispatcher = NotificationDispatcher::new(store, sender, limiter, &config.dispatch.default_language)
        .with_shutdown(shutdown);
    Monitor::new(build_sources(config), detector, dispatcher)
}

async fn run(config: KouranConfig) -> Result<()> {
    config.validate(true)?;
    let store = open_store(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Arc::new(build_monitor(&config, store, shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Ctrl-C received, finishing current work...");
            shutdown_tx.send(true).ok();
        }
    });

    let job = move || {
        let monitor = monitor.clone();
        async move { monitor.run_once().await }
    };
    spawn_scheduler(job, SchedulerSettings::from(&config.monitor), shutdown_rx)
        .await
        .context("scheduler task failed")?;
    tracing::info!("👋 KouranBot stopped");
    Ok(())
}

async fn check(config: KouranConfig) -> Result<()> {
    config.validate(true)?;
    let store = open_store(&config)?;
    // Never signalled: a one-off check always runs to completion.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = build_monitor(&config, store, shutdown_rx);

    let report = monitor.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn parse(config: KouranConfig, kind: SourceKind) -> Result<()> {
    let timeout = Duration::from_secs(config.sources.timeout_secs);
    let source: Box<dyn OutageSource> = match kind {
        SourceKind::Ceb => Box::new(CebSource::new(&config.sources.ceb_url, timeout)),
        SourceKind::Feed => Box::new(FeedSource::new(&config.sources.feed_url, timeout)),
    };

    let outages = source
        .fetch()
        .await
        .with_context(|| format!("fetching {}", source.name()))?;
    let buckets = categorize(&outages, chrono::Utc::now());
    println!("{}", serde_json::to_string_pretty(&buckets)?);
    Ok(())
}

fn localities(input: &Path, output: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let dataset: serde_json::Value = serde_json::from_str(&raw).context("dataset is not JSON")?;
    let index = build_locality_index(&dataset)?;

    std::fs::write(output, serde_json::to_string_pretty(&index)?)
        .with_context(|| format!("writing {}", output.display()))?;
    let total: usize = index.values().map(Vec::len).sum();
    println!("✅ Wrote {} districts, {total} localities to {}", index.len(), output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kouran=debug,kouran_core=debug,kouran_sources=debug,kouran_store=debug,kouran_notify=debug,kouran_monitor=debug"
    } else {
        "kouran=info,kouran_core=info,kouran_sources=info,kouran_store=info,kouran_notify=info,kouran_monitor=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run => run(load_config(config_path)?).await,
        Command::Check => check(load_config(config_path)?).await,
        Command::Parse { source } => parse(load_config(config_path)?, source).await,
        Command::Localities { input, output } => localities(&input, &output),
    }
}
