//! FLEXguard: floating-license pool monitoring and policy enforcement
//!
//! Monitors a pool of FLEX-style license servers for one feature,
//! accounts per-user usage across periodic `lmstat` dumps and enforces
//! administrative policies on top of the collected picture.
//!
//! ## Architecture
//!
//! - **Acquisition**: one worker per host runs the stat command, parses
//!   the dump and accumulates per-user usage
//! - **Fleet Manager**: fans the cycle out and in, merges per-host
//!   increments into the fleet ledger, owns reload/restart and the
//!   option file
//! - **Strategy Engine**: priority-ordered policies (ban long users to
//!   keep headroom, warn users near their budget) acting through named
//!   service callbacks
//! - **Notifier**: queued mail delivery for warn/ban/unban events

pub mod acquisition;
pub mod command;
pub mod config;
pub mod fleet;
pub mod notify;
pub mod services;
pub mod state;
pub mod strategy;
pub mod types;

// Re-export the types most callers assemble the daemon from.
pub use command::{CommandOutput, CommandRunner, ShellRunner};
pub use config::{AppConfig, ConfigError, FleetConfig, MailerConfig};
pub use fleet::{FleetManager, LogSaver, SnapshotLog, UserLedger};
pub use notify::{MailMessage, Mailer};
pub use services::register_fleet_services;
pub use strategy::{
    KeepFreePercentageBanLongUsers, PriorityTier, ServiceRegistry, Strategy, StrategyEnforcer,
    WarnUsersBeforeMaxUsageTime,
};
pub use types::{MonitoredUser, SessionUser, User, UserEvent, UserId};
