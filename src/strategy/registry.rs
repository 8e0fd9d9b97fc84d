//! Named capability registry for policy strategies
//!
//! Strategies never touch the fleet directly: every effect and every
//! query goes through a capability registered here by name. Names are
//! unique, presence is validated when a strategy is added to the
//! engine, and a lookup for an unregistered name fails with
//! [`StrategyError::UnknownService`].

use crate::types::{MonitoredUser, UserEvent, UserId};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;
use thiserror::Error;

/// Capability names strategies declare as requirements.
pub mod service_names {
    pub const RESET_USER_USAGE: &str = "reset_user_usage";
    pub const USERS_TO_BAN: &str = "users_to_ban";
    pub const WRITE_OPTIONS_FILE: &str = "write_options_file";
    pub const NOTIFY_EVENT: &str = "notify_event";
    pub const SCHEDULE_RELOAD_ONCE: &str = "schedule_reload_once";
    pub const FREE_PERCENTAGE: &str = "free_percentage";
    pub const TOTAL_USERS: &str = "total_users";
    pub const USERS_NEAR_LIMIT: &str = "users_near_limit";
}

/// Errors of the policy plane.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("service {0:?} is already registered")]
    DuplicateService(&'static str),

    #[error("service {0:?} does not have the expected shape")]
    ServiceMismatch(&'static str),

    #[error("strategy {strategy:?} requires unregistered service {service:?}")]
    InvalidService { strategy: String, service: String },
}

/// One registered capability.
///
/// Each variant carries the callback for exactly one of the named
/// capabilities; the variant fixes both the name and the signature.
pub enum Service {
    /// Reset a user's accumulated usage at the given instant.
    ResetUserUsage(Box<dyn Fn(&UserId, NaiveDateTime) + Send>),
    /// Candidates for banning, most expendable first.
    UsersToBan(Box<dyn Fn() -> Vec<MonitoredUser> + Send>),
    /// Rewrite the license option file with optional extra content.
    WriteOptionsFile(Box<dyn Fn(Option<&str>) + Send>),
    /// Notify users of a warn/ban/unban event.
    NotifyEvent(Box<dyn Fn(&[MonitoredUser], UserEvent) + Send>),
    /// Request one server reload; false when one is already pending.
    ScheduleReloadOnce(Box<dyn Fn() -> bool + Send>),
    /// Fleet-wide free-license ratio in `[0, 1]`.
    FreePercentage(Box<dyn Fn() -> f64 + Send>),
    /// Number of users the fleet currently accounts.
    TotalUsers(Box<dyn Fn() -> usize + Send>),
    /// Users within the given margin of their usage budget.
    UsersNearLimit(Box<dyn Fn(Duration) -> Vec<MonitoredUser> + Send>),
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::ResetUserUsage(_) => service_names::RESET_USER_USAGE,
            Service::UsersToBan(_) => service_names::USERS_TO_BAN,
            Service::WriteOptionsFile(_) => service_names::WRITE_OPTIONS_FILE,
            Service::NotifyEvent(_) => service_names::NOTIFY_EVENT,
            Service::ScheduleReloadOnce(_) => service_names::SCHEDULE_RELOAD_ONCE,
            Service::FreePercentage(_) => service_names::FREE_PERCENTAGE,
            Service::TotalUsers(_) => service_names::TOTAL_USERS,
            Service::UsersNearLimit(_) => service_names::USERS_NEAR_LIMIT,
        }
    }
}

/// Capability registry owned by the strategy engine.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<&'static str, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its fixed name.
    pub fn register(&mut self, service: Service) -> Result<(), StrategyError> {
        let name = service.name();
        if self.services.contains_key(name) {
            return Err(StrategyError::DuplicateService(name));
        }
        self.services.insert(name, service);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    fn get(&self, name: &'static str) -> Result<&Service, StrategyError> {
        self.services
            .get(name)
            .ok_or_else(|| StrategyError::UnknownService(name.to_string()))
    }

    pub fn reset_user_usage(&self, uid: &UserId, when: NaiveDateTime) -> Result<(), StrategyError> {
        match self.get(service_names::RESET_USER_USAGE)? {
            Service::ResetUserUsage(f) => {
                f(uid, when);
                Ok(())
            }
            _ => Err(StrategyError::ServiceMismatch(
                service_names::RESET_USER_USAGE,
            )),
        }
    }

    pub fn users_to_ban(&self) -> Result<Vec<MonitoredUser>, StrategyError> {
        match self.get(service_names::USERS_TO_BAN)? {
            Service::UsersToBan(f) => Ok(f()),
            _ => Err(StrategyError::ServiceMismatch(service_names::USERS_TO_BAN)),
        }
    }

    pub fn write_options_file(&self, content: Option<&str>) -> Result<(), StrategyError> {
        match self.get(service_names::WRITE_OPTIONS_FILE)? {
            Service::WriteOptionsFile(f) => {
                f(content);
                Ok(())
            }
            _ => Err(StrategyError::ServiceMismatch(
                service_names::WRITE_OPTIONS_FILE,
            )),
        }
    }

    pub fn notify_event(
        &self,
        users: &[MonitoredUser],
        event: UserEvent,
    ) -> Result<(), StrategyError> {
        match self.get(service_names::NOTIFY_EVENT)? {
            Service::NotifyEvent(f) => {
                f(users, event);
                Ok(())
            }
            _ => Err(StrategyError::ServiceMismatch(service_names::NOTIFY_EVENT)),
        }
    }

    pub fn schedule_reload_once(&self) -> Result<bool, StrategyError> {
        match self.get(service_names::SCHEDULE_RELOAD_ONCE)? {
            Service::ScheduleReloadOnce(f) => Ok(f()),
            _ => Err(StrategyError::ServiceMismatch(
                service_names::SCHEDULE_RELOAD_ONCE,
            )),
        }
    }

    pub fn free_percentage(&self) -> Result<f64, StrategyError> {
        match self.get(service_names::FREE_PERCENTAGE)? {
            Service::FreePercentage(f) => Ok(f()),
            _ => Err(StrategyError::ServiceMismatch(
                service_names::FREE_PERCENTAGE,
            )),
        }
    }

    pub fn total_users(&self) -> Result<usize, StrategyError> {
        match self.get(service_names::TOTAL_USERS)? {
            Service::TotalUsers(f) => Ok(f()),
            _ => Err(StrategyError::ServiceMismatch(service_names::TOTAL_USERS)),
        }
    }

    pub fn users_near_limit(&self, margin: Duration) -> Result<Vec<MonitoredUser>, StrategyError> {
        match self.get(service_names::USERS_NEAR_LIMIT)? {
            Service::UsersNearLimit(f) => Ok(f(margin)),
            _ => Err(StrategyError::ServiceMismatch(
                service_names::USERS_NEAR_LIMIT,
            )),
        }
    }
}
