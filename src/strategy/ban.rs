//! Free-headroom strategy: ban the longest-running users
//!
//! Keeps a minimum share of the pool's licenses free. When the free
//! ratio drops below `min_free_percentage`, the strategy bans enough
//! long-running users to bring the free share back up towards
//! `max_free_percentage`, by writing them into the option file's
//! exclude group. Bans last at least `keep_state_timeout`; once that
//! elapses the banned users are restored, notified and their usage
//! reset.
//!
//! The strategy evaluates against an externally supplied instant when
//! [`KeepFreePercentageBanLongUsers::set_when`] was called before the
//! apply, and against the current wall clock otherwise. The supplied
//! instant is consumed by one apply.

use super::{ServiceRegistry, Strategy, StrategyError};
use crate::fleet;
use crate::types::{MonitoredUser, UserEvent, UserId};
use chrono::{Duration, Local, NaiveDateTime};
use tracing::{debug, info, warn};

/// Enforcement state of the ban strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Init,
    Free,
    Deny,
}

impl std::fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationState::Init => f.write_str("INIT"),
            ApplicationState::Free => f.write_str("FREE"),
            ApplicationState::Deny => f.write_str("DENY"),
        }
    }
}

const REQUIRED_SERVICES: &[&str] = &[
    super::service_names::RESET_USER_USAGE,
    super::service_names::USERS_TO_BAN,
    super::service_names::WRITE_OPTIONS_FILE,
    super::service_names::NOTIFY_EVENT,
    super::service_names::SCHEDULE_RELOAD_ONCE,
    super::service_names::FREE_PERCENTAGE,
    super::service_names::TOTAL_USERS,
];

pub struct KeepFreePercentageBanLongUsers {
    keep_state_timeout: Duration,
    min_free_percentage: f64,
    max_free_percentage: f64,
    current_state: ApplicationState,
    ideal_state: ApplicationState,
    switch_time: Option<NaiveDateTime>,
    banned_users: Vec<MonitoredUser>,
    when: Option<NaiveDateTime>,
    when_set: bool,
    problems: Vec<String>,
}

impl KeepFreePercentageBanLongUsers {
    /// `keep_state_timeout` is the minimum dwell time between state
    /// switches; `min_free_percentage` triggers banning and
    /// `max_free_percentage` bounds how much headroom banning aims for.
    pub fn new(
        keep_state_timeout: Duration,
        min_free_percentage: f64,
        max_free_percentage: f64,
    ) -> Self {
        Self {
            keep_state_timeout,
            min_free_percentage,
            max_free_percentage,
            current_state: ApplicationState::Init,
            ideal_state: ApplicationState::Free,
            switch_time: None,
            banned_users: Vec::new(),
            when: None,
            when_set: false,
            problems: Vec::new(),
        }
    }

    /// Fix the instant the next apply evaluates at. Without this, the
    /// apply uses the current wall clock.
    pub fn set_when(&mut self, when: NaiveDateTime) {
        self.when = Some(when);
        self.when_set = true;
    }

    pub fn current_state(&self) -> ApplicationState {
        self.current_state
    }

    pub fn ideal_state(&self) -> ApplicationState {
        self.ideal_state
    }

    pub fn banned_users(&self) -> &[MonitoredUser] {
        &self.banned_users
    }

    fn banned_uids(&self) -> Vec<UserId> {
        self.banned_users.iter().map(|u| u.uid().clone()).collect()
    }

    /// Restore the previously banned users: preamble-only option file,
    /// usage reset, unban notification.
    fn unban_users(
        &mut self,
        services: &ServiceRegistry,
        when: NaiveDateTime,
    ) -> Result<(), StrategyError> {
        services.write_options_file(None)?;
        for user in &self.banned_users {
            services.reset_user_usage(user.uid(), when)?;
        }
        services.notify_event(&self.banned_users.clone(), UserEvent::Unban)?;
        self.banned_users.clear();
        Ok(())
    }

    fn switch_to_deny(
        &mut self,
        services: &ServiceRegistry,
        free_percentage: f64,
    ) -> Result<(), StrategyError> {
        info!("switched to enforcement state DENY");
        self.banned_users = services.users_to_ban()?;
        if self.banned_users.is_empty() {
            warn!("license pool is nearly full, but no user can be banned");
            return Ok(());
        }

        let total_users = services.total_users()?;
        // Positive whenever the max threshold sits above the current
        // free share, which it does once the min threshold tripped.
        let to_ban = ((self.max_free_percentage - free_percentage) * total_users as f64).floor()
            as i64;
        if to_ban <= 0 {
            warn!("the maximum free threshold is not high enough, no user will be banned");
            self.problems
                .push("maximum free threshold too low to ban anyone".to_string());
            return Ok(());
        }

        let to_ban = (to_ban as usize).min(self.banned_users.len());
        self.banned_users.truncate(to_ban);
        services.notify_event(&self.banned_users.clone(), UserEvent::Ban)?;
        services.write_options_file(Some(&fleet::deny_group(&self.banned_uids(), None)))?;
        Ok(())
    }
}

impl Strategy for KeepFreePercentageBanLongUsers {
    fn name(&self) -> &'static str {
        "keep-free-percentage-ban-long-users"
    }

    fn required_services(&self) -> &'static [&'static str] {
        REQUIRED_SERVICES
    }

    fn apply(&mut self, services: &ServiceRegistry) -> Result<(), StrategyError> {
        let when = if self.when_set {
            self.when.unwrap_or_else(|| Local::now().naive_local())
        } else {
            Local::now().naive_local()
        };
        self.when_set = false;

        if self.current_state == ApplicationState::Init {
            self.current_state = ApplicationState::Free;
            info!("ban strategy initialization done");
        }

        let free_percentage = services.free_percentage()?;
        self.ideal_state = if free_percentage < self.min_free_percentage {
            ApplicationState::Deny
        } else {
            ApplicationState::Free
        };
        debug!(
            free = free_percentage,
            current = %self.current_state,
            ideal = %self.ideal_state,
            "ban strategy evaluated"
        );

        let switch_allowed = match self.switch_time {
            None => true,
            Some(switched) => when - switched > self.keep_state_timeout,
        };

        if !switch_allowed {
            info!(
                state = %self.current_state,
                switched_at = ?self.switch_time,
                "switch not permitted yet, keeping state"
            );
            return Ok(());
        }

        // Dwell time served: release whoever is still banned before
        // deciding on the next state.
        if self.current_state == ApplicationState::Deny && !self.banned_users.is_empty() {
            self.unban_users(services, when)?;
            if !services.schedule_reload_once()? {
                info!("server reload already scheduled");
            }
            self.current_state = ApplicationState::Free;
        }

        if self.current_state != self.ideal_state {
            match self.ideal_state {
                ApplicationState::Deny => self.switch_to_deny(services, free_percentage)?,
                ApplicationState::Free => info!("switched to enforcement state FREE"),
                ApplicationState::Init => {}
            }
            if !services.schedule_reload_once()? {
                info!("server reload already scheduled");
            }
            self.current_state = self.ideal_state;
            self.switch_time = Some(when);
        } else {
            info!(
                state = %self.current_state,
                switched_at = ?self.switch_time,
                "keeping enforcement state"
            );
        }
        Ok(())
    }

    fn cleanup(&mut self, services: &ServiceRegistry) -> Result<(), StrategyError> {
        services.write_options_file(None)?;
        if !self.banned_users.is_empty() {
            services.notify_event(&self.banned_users.clone(), UserEvent::Unban)?;
        }
        self.banned_users.clear();
        Ok(())
    }

    fn reset_problems(&mut self) {
        self.problems.clear();
    }

    fn problems(&self) -> &[String] {
        &self.problems
    }
}
