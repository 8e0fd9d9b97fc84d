//! Daemon configuration
//!
//! Loaded from a TOML file with serde defaults for everything the
//! operator leaves out. Search order:
//!
//! 1. explicit path (CLI flag)
//! 2. `FLEXGUARD_CONFIG` environment variable
//! 3. `./flexguard.toml`
//!
//! Explicit values always win over the built-in defaults; there is no
//! path on which a default overwrites something the operator set.
//! Validation is fail-fast: a config that cannot drive the fleet is a
//! startup error, not a runtime surprise.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default license-server port.
pub const DEFAULT_PORT: u16 = 19353;

/// Default platform service name of the license manager.
pub const DEFAULT_SERVICE_NAME: &str = "FLEXlm License Manager";

/// Environment variable pointing at the configuration file.
pub const CONFIG_ENV_VAR: &str = "FLEXGUARD_CONFIG";

/// Configuration file searched in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "flexguard.toml";

const DEFAULT_FROM_NAME: &str = "License pool management";

/// Fallback admin recipients for mock-mode mail redirection.
const DEFAULT_ADMIN_ADDRS: &[&str] = &["license-admin@localhost"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration not parseable: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no configuration file found (set FLEXGUARD_CONFIG or provide ./flexguard.toml)")]
    NotFound,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    pub fleet: FleetConfig,

    pub mailer: MailerConfig,

    #[serde(default)]
    pub strategies: StrategiesConfig,

    #[serde(default)]
    pub logsaver: LogSaverConfig,
}

/// Cycle timing and snapshot sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between monitoring cycles.
    pub poll_interval_secs: u64,
    /// File the dump snapshots are appended to.
    pub snapshot_log: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            snapshot_log: PathBuf::from("dump-snapshots.log"),
        }
    }
}

/// License fleet to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Host this daemon runs on; reload and restart target it.
    pub current_host: String,
    /// License hosts to monitor.
    pub hosts: Vec<String>,
    /// Feature (product) name, e.g. `DOORS`.
    pub feature: String,
    /// Path to the license tool executable (`lmutil`).
    pub tool_path: PathBuf,
    /// License vendor daemon name, e.g. `telelogic`.
    pub vendor: String,
    /// Option file path; defaults to `<vendor>.opt`.
    #[serde(default)]
    pub option_file: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Mock mode skips the reload commands.
    #[serde(default)]
    pub mock: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl FleetConfig {
    /// Fill the option-file default once the vendor is known.
    fn resolve_defaults(&mut self) {
        if self.option_file.as_os_str().is_empty() {
            self.option_file = PathBuf::from(format!("{}.opt", self.vendor));
        }
    }
}

/// Mail delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    /// Sender address; the one setting with no usable default.
    pub from_addr: String,
    pub from_name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// SMTP connection timeout; `None` leaves the transport default.
    pub smtp_timeout_secs: Option<u64>,
    /// Recipients substituted for the real ones in mock mode.
    pub admin_addrs: Vec<String>,
    pub mock: bool,
    /// When false, messages are logged and dropped instead of sent.
    pub send_mails: bool,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            from_addr: String::new(),
            from_name: DEFAULT_FROM_NAME.to_string(),
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            smtp_timeout_secs: None,
            admin_addrs: DEFAULT_ADMIN_ADDRS.iter().map(|s| s.to_string()).collect(),
            mock: false,
            send_mails: true,
        }
    }
}

impl MailerConfig {
    /// The configured SMTP connection timeout.
    pub fn connection_timeout(&self) -> Option<std::time::Duration> {
        self.smtp_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// Thresholds of the enforcement strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    /// Allowed-usage budget granted to every user (hours).
    pub allowed_usage_hours: i64,
    pub ban: BanStrategyConfig,
    pub warn: WarnStrategyConfig,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            allowed_usage_hours: 10,
            ban: BanStrategyConfig::default(),
            warn: WarnStrategyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanStrategyConfig {
    /// Minimum dwell time between enforcement state switches (seconds).
    pub keep_state_timeout_secs: i64,
    /// Free share below which banning starts.
    pub min_free_percentage: f64,
    /// Free share banning aims to restore.
    pub max_free_percentage: f64,
}

impl Default for BanStrategyConfig {
    fn default() -> Self {
        Self {
            keep_state_timeout_secs: 3600,
            min_free_percentage: 0.2,
            max_free_percentage: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarnStrategyConfig {
    /// Free share below which users near their budget are warned.
    pub warn_threshold: f64,
    /// Warn this long before the budget runs out (seconds).
    pub warn_delay_secs: i64,
}

impl Default for WarnStrategyConfig {
    fn default() -> Self {
        Self {
            warn_threshold: 0.2,
            warn_delay_secs: 0,
        }
    }
}

/// License-tool log backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSaverConfig {
    pub save_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for LogSaverConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("log-backups"),
            log_file: PathBuf::from("flexlm.log"),
        }
    }
}

impl AppConfig {
    /// Load using the standard search order (see module docs).
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load_from_file(&path);
            }
            warn!(path = %path.display(), "FLEXGUARD_CONFIG points to a missing file, falling back");
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        Err(ConfigError::NotFound)
    }

    /// Load, resolve defaults and validate one specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.fleet.resolve_defaults();
        config.validate()?;
        info!(
            path = %path.display(),
            feature = %config.fleet.feature,
            hosts = config.fleet.hosts.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Reject configurations that cannot drive the daemon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.hosts.is_empty() {
            return Err(ConfigError::Invalid("no hosts to monitor".to_string()));
        }
        if self.fleet.feature.trim().is_empty() {
            return Err(ConfigError::Invalid("feature name is empty".to_string()));
        }
        if self.fleet.current_host.trim().is_empty() {
            return Err(ConfigError::Invalid("current host is empty".to_string()));
        }
        if self.fleet.vendor.trim().is_empty() {
            return Err(ConfigError::Invalid("vendor is empty".to_string()));
        }
        if self.mailer.from_addr.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mailer from address is required".to_string(),
            ));
        }
        if self.daemon.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.strategies.ban.max_free_percentage < self.strategies.ban.min_free_percentage {
            warn!(
                min = self.strategies.ban.min_free_percentage,
                max = self.strategies.ban.max_free_percentage,
                "max free percentage below min; the ban strategy will never ban anyone"
            );
        }
        Ok(())
    }
}
