//! flexguard - license pool monitor daemon
//!
//! Polls every configured license host on an interval, folds the
//! per-user usage into the fleet ledger, applies the enforcement
//! strategies and executes any reload they scheduled.
//!
//! # Usage
//!
//! ```bash
//! # Run against ./flexguard.toml
//! flexguard
//!
//! # Explicit config, single cycle, nothing risky executed
//! flexguard --config /etc/flexguard.toml --once --mock
//! ```
//!
//! # Environment Variables
//!
//! - `FLEXGUARD_CONFIG`: configuration file path (the --config flag wins)
//! - `RUST_LOG`: logging filter (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use flexguard::config::AppConfig;
use flexguard::fleet::{FleetManager, LogSaver, SnapshotLog, UserLedger};
use flexguard::notify::Mailer;
use flexguard::services::register_fleet_services;
use flexguard::strategy::{
    KeepFreePercentageBanLongUsers, PriorityTier, ServiceRegistry, StrategyEnforcer,
    WarnUsersBeforeMaxUsageTime,
};
use flexguard::ShellRunner;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flexguard")]
#[command(about = "Floating-license pool monitor and policy enforcer")]
#[command(version)]
struct CliArgs {
    /// Path to the configuration file (falls back to FLEXGUARD_CONFIG,
    /// then ./flexguard.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single monitoring cycle and exit
    #[arg(long)]
    once: bool,

    /// Override the poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Mock mode: skip reload commands and redirect mail to the admins
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if args.mock {
        config.fleet.mock = true;
        config.mailer.mock = true;
    }
    if let Some(secs) = args.interval {
        config.daemon.poll_interval_secs = secs;
    }

    info!(
        feature = %config.fleet.feature,
        hosts = config.fleet.hosts.len(),
        interval_secs = config.daemon.poll_interval_secs,
        mock = config.fleet.mock,
        "starting flexguard"
    );

    let snapshot = Arc::new(
        SnapshotLog::create(&config.daemon.snapshot_log).with_context(|| {
            format!(
                "opening snapshot log {}",
                config.daemon.snapshot_log.display()
            )
        })?,
    );
    let log_saver = LogSaver::new(&config.logsaver.save_dir, &config.logsaver.log_file);
    let ledger = Arc::new(Mutex::new(UserLedger::new(chrono::Duration::hours(
        config.strategies.allowed_usage_hours,
    ))));
    let mailer = Mailer::start(config.mailer.clone()).context("starting mailer")?;

    let mut fleet = FleetManager::new(
        config.fleet.clone(),
        log_saver,
        Arc::new(ShellRunner),
        snapshot,
        Arc::clone(&ledger),
    )
    .context("starting fleet manager")?;

    let mut registry = ServiceRegistry::new();
    register_fleet_services(
        &mut registry,
        fleet.ledger(),
        fleet.reload_flag(),
        config.fleet.option_file.clone(),
        mailer.handle(),
        config.fleet.feature.clone(),
    )
    .context("registering fleet services")?;

    let mut enforcer = StrategyEnforcer::new(registry);
    enforcer
        .add_strategy(
            Box::new(KeepFreePercentageBanLongUsers::new(
                chrono::Duration::seconds(config.strategies.ban.keep_state_timeout_secs),
                config.strategies.ban.min_free_percentage,
                config.strategies.ban.max_free_percentage,
            )),
            Some(PriorityTier::High),
        )
        .context("adding ban strategy")?;
    enforcer
        .add_strategy(
            Box::new(WarnUsersBeforeMaxUsageTime::new(
                config.strategies.warn.warn_threshold,
                chrono::Duration::seconds(config.strategies.warn.warn_delay_secs),
            )),
            None,
        )
        .context("adding warn strategy")?;

    fleet.ensure_server_availability().await;

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.daemon.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("entering monitoring loop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
            _ = interval.tick() => {
                fleet.monitor_license().await;
                enforcer.apply_strategies();
                if fleet.take_scheduled_reload() {
                    fleet.reload_server().await;
                }
                if args.once {
                    break;
                }
            }
        }
    }

    enforcer.cleanup_strategies();
    if fleet.take_scheduled_reload() {
        info!("pending reload discarded at shutdown");
    }
    fleet.terminate().await;
    mailer.terminate().await;

    info!("flexguard shutdown complete");
    Ok(())
}
