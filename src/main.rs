//! # TimeCap — delayed-delivery time capsules
//!
//! Seal 1–3 answers now; get them back by email, SMS, or browser push when
//! the interval elapses.
//!
//! Usage:
//!   timecap serve                  # HTTP gateway + periodic sweep loop
//!   timecap sweep                  # Run one sweep and exit
//!   timecap migrate                # Migrate the legacy capsule set
//!   timecap deliver-now <ID>       # Deliver a single capsule immediately
//!   timecap config init            # Write a default config file

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use timecap_channels::{SmtpEmailSender, TwilioSmsSender, WebPushSender};
use timecap_core::config::TimecapConfig;
use timecap_delivery::{Migrator, Sweeper};
use timecap_gateway::AppState;
use timecap_store::{CapsuleStore, RedisKv};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "timecap", version, about = "⏳ TimeCap — delayed-delivery time capsules")]
struct Cli {
    /// Path to config file (default: ~/.timecap/config.toml)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway (and the sweep loop, unless disabled)
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one delivery sweep and exit
    Sweep,
    /// Migrate the legacy capsule set into the per-user model
    Migrate,
    /// Deliver a single capsule immediately, due or not
    DeliverNow {
        /// Capsule id
        id: String,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file if none exists
    Init,
    /// Print the effective config as TOML
    Show,
    /// Print the config file path
    Path,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Wire up store, channel adapters, sweeper, and migrator from config.
async fn build_state(config: &TimecapConfig) -> Result<AppState> {
    let kv = RedisKv::connect(&config.redis.url).await?;
    let store = CapsuleStore::new(Arc::new(kv));

    let push = WebPushSender::new(config.push.clone());
    let vapid_public_key = push.vapid_public_key().to_string();

    let sweeper = Arc::new(Sweeper::new(
        store.clone(),
        Arc::new(SmtpEmailSender::new(config.email.clone())),
        Arc::new(TwilioSmsSender::new(config.sms.clone())),
        Arc::new(push),
    ));
    let migrator = Arc::new(Migrator::new(store.clone()));

    Ok(AppState {
        store,
        sweeper,
        migrator,
        vapid_public_key,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "timecap=debug,tower_http=debug"
    } else {
        "timecap=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TimecapConfig::load_from(path)?,
        None => TimecapConfig::load()?,
    };

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let state = build_state(&config).await?;

            if config.sweep.run_in_server {
                let sweeper = state.sweeper.clone();
                let interval_secs = config.sweep.interval_secs.max(1);
                tokio::spawn(async move {
                    let mut ticker =
                        tokio::time::interval(std::time::Duration::from_secs(interval_secs));
                    loop {
                        ticker.tick().await;
                        match sweeper.run(now_millis()).await {
                            Ok(report) => {
                                if report.delivered > 0 || report.errors > 0 {
                                    tracing::info!(
                                        "⏰ Scheduled sweep: {} delivered, {} errors",
                                        report.delivered,
                                        report.errors
                                    );
                                }
                            }
                            Err(e) => tracing::error!("Scheduled sweep failed: {e}"),
                        }
                    }
                });
                tracing::info!("⏰ Sweep loop running every {interval_secs}s");
            }

            timecap_gateway::start(&config.gateway, state).await?;
        }
        Command::Sweep => {
            let state = build_state(&config).await?;
            let report = state.sweeper.run(now_millis()).await?;
            println!("📬 Sweep: {} delivered, {} errors", report.delivered, report.errors);
        }
        Command::Migrate => {
            let state = build_state(&config).await?;
            let report = state.migrator.run(now_millis()).await?;
            println!(
                "🚚 Migration: {} capsules, {} users, {} errors",
                report.migrated, report.users, report.errors
            );
        }
        Command::DeliverNow { id } => {
            let state = build_state(&config).await?;
            let report = state.sweeper.deliver_now(&id).await?;
            println!("📬 Delivered {id} ({} errors)", report.errors);
        }
        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = TimecapConfig::default_path();
                if path.exists() {
                    println!("⚠️  Config already exists: {}", path.display());
                } else {
                    TimecapConfig::default().save()?;
                    println!("✅ Config written: {}", path.display());
                }
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                println!("{}", TimecapConfig::default_path().display());
            }
        },
    }

    Ok(())
}
