//! # TierNotify: lifecycle notification scheduler
//!
//! Usage:
//!   tiernotify run [--dry-run]                 # One evaluation pass
//!   tiernotify watch --every 86400 [--dry-run] # Periodic passes until Ctrl-C
//!   tiernotify catalog                         # Print the notification catalog
//!   tiernotify bookkeeping <tenant>            # Print a tenant's stored bookkeeping

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tiernotify_channels::{HttpDeliveryChannel, HttpDeliveryConfig};
use tiernotify_core::TierNotifyConfig;
use tiernotify_core::types::TenantId;
use tiernotify_scheduler::{Catalog, Collaborators, EngineSettings, NotificationEngine, RunReport};
use tiernotify_store::RecordDb;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tiernotify",
    version,
    about = "Trial and tier lifecycle notification scheduler"
)]
struct Cli {
    /// Config file (default: ~/.tiernotify/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Record database path (overrides [store].db_path)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON log output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate every tenant once
    Run {
        /// Log intended sends without delivering or writing bookkeeping
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate repeatedly until interrupted
    Watch {
        /// Seconds between runs
        #[arg(long, default_value = "86400")]
        every: u64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the active notification catalog as JSON
    Catalog,
    /// Print the stored bookkeeping for a tenant
    Bookkeeping {
        tenant: String,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "tiernotify=debug" } else { "tiernotify=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<TierNotifyConfig> {
    let mut config = match path {
        Some(path) => TierNotifyConfig::load_from(path)?,
        None => TierNotifyConfig::load()?,
    };
    if let Ok(key) = std::env::var("TIERNOTIFY_DELIVERY_API_KEY") {
        config.delivery.api_key = key;
    }
    config.validate()?;
    Ok(config)
}

fn load_catalog(config: &TierNotifyConfig) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => {
            let path = expand_path(path);
            let catalog = Catalog::load_from(Path::new(&path))
                .with_context(|| format!("loading catalog {path}"))?;
            tracing::info!(path = %path, version = catalog.version, "loaded catalog");
            Ok(catalog)
        }
        None => Ok(Catalog::builtin()),
    }
}

fn open_db(cli: &Cli, config: &TierNotifyConfig) -> Result<Arc<RecordDb>> {
    let raw = cli.db_path.as_deref().unwrap_or(&config.store.db_path);
    let path = expand_path(raw);
    let db = RecordDb::open(Path::new(&path))
        .with_context(|| format!("opening record database {path}"))?
        .with_admin_roles(config.recipients.admin_roles.clone());
    Ok(Arc::new(db))
}

fn build_engine(config: &TierNotifyConfig, catalog: Catalog, db: Arc<RecordDb>) -> NotificationEngine {
    let channel = Arc::new(HttpDeliveryChannel::new(HttpDeliveryConfig::from(&config.delivery)));
    let collab = Collaborators {
        enrollments: db.clone(),
        bookkeeping: db.clone(),
        recipients: db.clone(),
        usage: db.clone(),
        assets: db.clone(),
        activations: db.clone(),
        contracts: db,
        delivery: channel,
    };
    NotificationEngine::new(Arc::new(catalog), collab, EngineSettings::from_config(config))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight tenants");
            token.cancel();
        }
    });
}

/// One run, canceled early if the configured deadline elapses.
async fn run_once(
    engine: &NotificationEngine,
    config: &TierNotifyConfig,
    dry_run: bool,
    shutdown: &CancellationToken,
) -> RunReport {
    let cancel = shutdown.child_token();
    if let Some(secs) = config.scheduler.run_deadline_secs {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::warn!(deadline_secs = secs, "run deadline reached, canceling");
                    deadline.cancel();
                }
                _ = deadline.cancelled() => {}
            }
        });
    }
    let report = engine.run(dry_run, &cancel).await;
    cancel.cancel();
    report
}

fn print_report(report: &RunReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("TierNotify run finished{mode}");
    println!("   Sent:               {}", report.sent);
    println!("   Suppressed:         {}", report.suppressed);
    println!("   Skipped:            {}", report.skipped);
    println!("   Notifications:      {}", report.notifications_sent);
    println!("   Superseded:         {}", report.superseded);
    println!("   Failed persists:    {}", report.failed_persists);
    println!("   Canceled (unstarted): {}", report.canceled);
    if report.failed_segments > 0 {
        println!("   Failed segments:    {}", report.failed_segments);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Run { dry_run } => {
            let db = open_db(&cli, &config)?;
            let engine = build_engine(&config, load_catalog(&config)?, db);
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());

            let report = run_once(&engine, &config, *dry_run, &shutdown).await;
            print_report(&report);
        }
        Command::Watch { every, dry_run } => {
            let db = open_db(&cli, &config)?;
            let engine = build_engine(&config, load_catalog(&config)?, db);
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            tracing::info!(every_secs = every, dry_run, "watch started");

            let mut interval = tokio::time::interval(Duration::from_secs((*every).max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                let report = run_once(&engine, &config, *dry_run, &shutdown).await;
                print_report(&report);
                if shutdown.is_cancelled() {
                    break;
                }
            }
            tracing::info!("watch stopped");
        }
        Command::Catalog => {
            let catalog = load_catalog(&config)?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        Command::Bookkeeping { tenant } => {
            let db = open_db(&cli, &config)?;
            match db.load_bookkeeping(&TenantId::new(tenant.as_str()))? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No bookkeeping recorded for tenant '{tenant}'"),
            }
        }
    }

    Ok(())
}
