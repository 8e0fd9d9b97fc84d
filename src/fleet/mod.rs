//! License-fleet management
//!
//! The [`FleetManager`] owns one [`HostMonitor`](crate::acquisition::HostMonitor)
//! per license host and drives the fan-out/fan-in monitoring cycle:
//! trigger every host, collect every result, fold the increments into
//! the shared [`UserLedger`]. It also owns the externally visible side
//! effects of policy enforcement: writing the tool's option file,
//! scheduling and executing reloads, and the stop/start restart path
//! with log backup around it.

mod ledger;
mod logsaver;
mod snapshot;

pub use ledger::UserLedger;
pub use logsaver::LogSaver;
pub use snapshot::SnapshotLog;

use crate::acquisition::{DumpParser, HostMonitor};
use crate::command::CommandRunner;
use crate::config::{ConfigError, FleetConfig};
use crate::state::ServerState;
use crate::types::UserId;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Exclusion group written to the option file when banning users.
pub const DEFAULT_EXCLUDE_GROUP: &str = "GROUP_DOORS_EXCLUDE";

/// Fixed option-file preamble; every write starts with these lines.
pub const OPTION_FILE_PREAMBLE: &str = "GROUP DOORSUSER SBX\nEXCLUDE DOORS GROUP DOORSUSER\n";

/// Settle time between the reload commands, and before the post-reload
/// liveness check. The license daemon needs it to pick the option file up.
const RELOAD_SETTLE: std::time::Duration = std::time::Duration::from_secs(60);

/// Write the option file: the fixed preamble, then `content` if given.
///
/// The file is rewritten wholesale; the tool re-reads it on reload.
pub fn write_options_file(path: &Path, content: Option<&str>) -> std::io::Result<()> {
    let mut buffer = String::from(OPTION_FILE_PREAMBLE);
    if let Some(content) = content {
        buffer.push_str(content);
    }
    std::fs::write(path, buffer)
}

/// Render the deny-group block for the option file.
///
/// Empty input produces an empty string so callers can pass the result
/// straight to [`write_options_file`].
pub fn deny_group(users: &[UserId], group_name: Option<&str>) -> String {
    if users.is_empty() {
        return String::new();
    }
    let group = group_name.unwrap_or(DEFAULT_EXCLUDE_GROUP);
    let joined = users
        .iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    format!("GROUPCASEINSENSITIVE ON\nGROUP {group} {joined}\nEXCLUDE DOORS GROUP {group}\n")
}

/// Owns the host monitors and the fleet-level side effects.
pub struct FleetManager {
    config: FleetConfig,
    runner: Arc<dyn CommandRunner>,
    monitors: HashMap<String, HostMonitor>,
    ledger: Arc<Mutex<UserLedger>>,
    reload_pending: Arc<AtomicBool>,
    reload_commands: Vec<String>,
    stat_ok: Regex,
    last_dump: Option<NaiveDateTime>,
    log_saver: LogSaver,
}

impl FleetManager {
    /// Start one monitor per configured host.
    ///
    /// Fails fast when the license tool is not present at the configured
    /// path; every later operation shells out to it.
    pub fn new(
        config: FleetConfig,
        log_saver: LogSaver,
        runner: Arc<dyn CommandRunner>,
        snapshot: Arc<SnapshotLog>,
        ledger: Arc<Mutex<UserLedger>>,
    ) -> Result<Self, ConfigError> {
        if !config.tool_path.is_file() {
            return Err(ConfigError::Invalid(format!(
                "license tool not found at {}",
                config.tool_path.display()
            )));
        }

        let mut monitors = HashMap::new();
        for host in &config.hosts {
            let canonical = host.trim().to_uppercase();
            let parser = DumpParser::new(&config.feature)
                .map_err(|e| ConfigError::Invalid(format!("feature name not usable: {e}")))?;
            let command = stat_command(&config, host);
            monitors.insert(
                canonical.clone(),
                HostMonitor::start(
                    &canonical,
                    command,
                    parser,
                    Arc::clone(&runner),
                    Arc::clone(&snapshot),
                ),
            );
        }

        let reload_commands = vec![
            format!(
                "\"{}\" lmdown -c {}@{} -vendor {} -q",
                config.tool_path.display(),
                config.port,
                config.current_host,
                config.vendor
            ),
            format!(
                "\"{}\" lmreread -c {}@{} -vendor {}",
                config.tool_path.display(),
                config.port,
                config.current_host,
                config.vendor
            ),
        ];

        // Liveness matches any feature's totals line, not just the
        // monitored one.
        let stat_ok = Regex::new(
            r"^Users of .*?Total of (\d+) licenses issued.*?Total of (\d+) licenses in use.*",
        )
        .map_err(|e| ConfigError::Invalid(format!("status pattern: {e}")))?;

        info!(feature = %config.feature, hosts = monitors.len(), "license fleet manager started");
        Ok(Self {
            config,
            runner,
            monitors,
            ledger,
            reload_pending: Arc::new(AtomicBool::new(false)),
            reload_commands,
            stat_ok,
            last_dump: None,
            log_saver,
        })
    }

    pub fn feature(&self) -> &str {
        &self.config.feature
    }

    pub fn last_dump(&self) -> Option<NaiveDateTime> {
        self.last_dump
    }

    /// Shared handle to the fleet user ledger.
    pub fn ledger(&self) -> Arc<Mutex<UserLedger>> {
        Arc::clone(&self.ledger)
    }

    /// Shared handle to the reload-once flag.
    pub fn reload_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reload_pending)
    }

    /// Current state snapshot for one host, if it is monitored.
    pub async fn server_data(&self, host: &str) -> Option<ServerState> {
        let monitor = self.monitors.get(&host.trim().to_uppercase())?;
        Some(monitor.data().await)
    }

    /// Run one fleet-wide monitoring cycle.
    ///
    /// Fan-out: arm every host monitor. Fan-in: await each result in
    /// turn (completion order across hosts is unspecified), sum the
    /// active users and merge each host's increments into the ledger.
    pub async fn monitor_license(&mut self) {
        for monitor in self.monitors.values() {
            monitor.monitor();
        }

        let mut active_users = 0usize;
        for monitor in self.monitors.values() {
            let snapshot = monitor.data().await;
            active_users += snapshot.user_count();
            if let Some(ts) = snapshot.last_dump() {
                if self.last_dump.map_or(true, |seen| ts > seen) {
                    self.last_dump = Some(ts);
                }
            }
            self.ledger
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .merge_dump(&snapshot);
        }

        info!(
            feature = %self.config.feature,
            active_users,
            "monitoring cycle complete"
        );
    }

    /// Check whether `host` serves any licenses at all.
    ///
    /// True iff a one-shot stat reports a feature with more than zero
    /// licenses issued. Command failures simply yield `false`.
    pub async fn is_alive(&self, host: &str) -> bool {
        let command = stat_command(&self.config, host);
        let result = self.runner.run(&command).await;
        for line in result.split_lines() {
            if let Some(caps) = self.stat_ok.captures(&line) {
                let issued: u32 = caps[1].parse().unwrap_or(0);
                if issued > 0 {
                    return true;
                }
                warn!(line = %line, "status line found but no licenses issued");
            }
        }
        false
    }

    /// Soft reload: `lmdown` then `lmreread` against the current host.
    ///
    /// Falls back to a full restart when either command fails, and
    /// verifies liveness afterwards.
    pub async fn reload_server(&mut self) {
        info!("reloading license server");
        let commands = self.reload_commands.clone();
        for command in &commands {
            debug!(command = %command, "sending reload command");
            if self.config.mock {
                continue;
            }
            let result = self.runner.run(command).await;
            if result.has_errors() {
                warn!(errors = %result.errors(), "reload command failed, falling back to restart");
                self.restart_server().await;
                break;
            }
            info!(command = %command, "reload command successful");
            tokio::time::sleep(RELOAD_SETTLE).await;
        }

        let current = self.config.current_host.clone();
        if !self.is_alive(&current).await {
            warn!("server not alive after reload, restarting");
            self.restart_server().await;
        }
    }

    /// Hard restart: back the tool log up, stop and start the service,
    /// merge the logs back. Every stage's failure is logged, none is
    /// fatal.
    pub async fn restart_server(&mut self) {
        self.log_saver.backup_log();
        info!(service = %self.config.service_name, "restarting license server service");

        let stop = self.runner.run(&self.service_command("stop")).await;
        if stop.has_errors() {
            warn!(errors = %stop.errors(), "service stop failed");
        } else {
            info!("service stop successful");
        }

        let start = self.runner.run(&self.service_command("start")).await;
        if start.has_errors() {
            warn!(errors = %start.errors(), "service start failed");
        } else {
            info!("service start successful");
        }

        self.log_saver.merge_last_logs();
    }

    /// Restart the server when it is down. Returns whether it was
    /// already available.
    pub async fn ensure_server_availability(&mut self) -> bool {
        info!(host = %self.config.current_host, "checking server availability");
        let current = self.config.current_host.clone();
        if self.is_alive(&current).await {
            info!(host = %self.config.current_host, "server is available");
            true
        } else {
            warn!(host = %self.config.current_host, "server is down, attempting restart");
            self.restart_server().await;
            false
        }
    }

    /// Rewrite the option file through the manager's configured path.
    pub fn write_options_file(&self, content: Option<&str>) {
        match write_options_file(&self.config.option_file, content) {
            Ok(()) => info!(file = %self.config.option_file.display(), "option file rewritten"),
            Err(e) => warn!(
                file = %self.config.option_file.display(),
                error = %e,
                "failed to write option file"
            ),
        }
    }

    /// Request a reload after the current policy cycle. Returns `false`
    /// when one is already pending.
    pub fn schedule_reload_once(&self) -> bool {
        let newly = !self.reload_pending.swap(true, Ordering::SeqCst);
        if !newly {
            debug!("server reload already scheduled");
        }
        newly
    }

    /// Consume the pending-reload flag.
    pub fn take_scheduled_reload(&self) -> bool {
        self.reload_pending.swap(false, Ordering::SeqCst)
    }

    /// Stop every host monitor and wait for the workers to exit.
    pub async fn terminate(&mut self) {
        for monitor in self.monitors.values_mut() {
            monitor.terminate().await;
        }
        info!(feature = %self.config.feature, "license fleet manager terminated");
    }

    fn service_command(&self, action: &str) -> String {
        if cfg!(windows) {
            format!("net {action} \"{}\"", self.config.service_name)
        } else {
            format!("systemctl {action} \"{}\"", self.config.service_name)
        }
    }
}

/// Stat command for one host: `"<tool>" lmstat -c <port>@<host> -f <feature>`.
fn stat_command(config: &FleetConfig, host: &str) -> String {
    format!(
        "\"{}\" lmstat -c {}@{} -f {}",
        config.tool_path.display(),
        config.port,
        host,
        config.feature
    )
}
