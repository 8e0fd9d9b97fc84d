//! Warn users approaching their usage budget
//!
//! When free headroom drops below the warn threshold, users that are
//! within `warn_delay` of exhausting their allowed usage get a warning
//! notification. The strategy is advisory only; banning is the
//! headroom strategy's job.

use super::{ServiceRegistry, Strategy, StrategyError};
use crate::types::UserEvent;
use chrono::Duration;
use tracing::{debug, info, warn};

const REQUIRED_SERVICES: &[&str] = &[
    super::service_names::NOTIFY_EVENT,
    super::service_names::FREE_PERCENTAGE,
    super::service_names::USERS_NEAR_LIMIT,
];

pub struct WarnUsersBeforeMaxUsageTime {
    warn_threshold: f64,
    warn_delay: Duration,
    warned_users: usize,
    problems: Vec<String>,
}

impl WarnUsersBeforeMaxUsageTime {
    /// Warn when the free share drops below `warn_threshold`; users are
    /// warned `warn_delay` before their budget runs out.
    pub fn new(warn_threshold: f64, warn_delay: Duration) -> Self {
        Self {
            warn_threshold,
            warn_delay,
            warned_users: 0,
            problems: Vec::new(),
        }
    }

    /// Total number of users warned since startup.
    pub fn warned_users(&self) -> usize {
        self.warned_users
    }
}

impl Strategy for WarnUsersBeforeMaxUsageTime {
    fn name(&self) -> &'static str {
        "warn-users-before-max-usage"
    }

    fn required_services(&self) -> &'static [&'static str] {
        REQUIRED_SERVICES
    }

    fn apply(&mut self, services: &ServiceRegistry) -> Result<(), StrategyError> {
        let free_percentage = services.free_percentage()?;
        if free_percentage >= self.warn_threshold {
            debug!(free = free_percentage, "headroom above warn threshold");
            return Ok(());
        }

        let to_warn = services.users_near_limit(self.warn_delay)?;
        if to_warn.is_empty() {
            warn!("warning threshold reached but no user needs warning");
            return Ok(());
        }

        services.notify_event(&to_warn, UserEvent::Warn)?;
        self.warned_users += to_warn.len();
        info!(warned = to_warn.len(), total = self.warned_users, "users warned");
        Ok(())
    }

    fn reset_problems(&mut self) {
        self.problems.clear();
    }

    fn problems(&self) -> &[String] {
        &self.problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Service;
    use crate::types::{MonitoredUser, UserId};
    use std::sync::{Arc, Mutex};

    fn registry(
        free: f64,
        near_limit: Vec<MonitoredUser>,
        notified: &Arc<Mutex<Vec<(usize, UserEvent)>>>,
    ) -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry
            .register(Service::FreePercentage(Box::new(move || free)))
            .unwrap();
        registry
            .register(Service::UsersNearLimit(Box::new(move |_delay| {
                near_limit.clone()
            })))
            .unwrap();
        let sink = Arc::clone(notified);
        registry
            .register(Service::NotifyEvent(Box::new(move |users, event| {
                sink.lock().unwrap().push((users.len(), event));
            })))
            .unwrap();
        registry
    }

    #[test]
    fn no_warning_above_threshold() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(0.5, vec![MonitoredUser::new(UserId::new("A"))], &notified);
        let mut strategy = WarnUsersBeforeMaxUsageTime::new(0.2, Duration::hours(1));

        strategy.apply(&registry).unwrap();
        assert!(notified.lock().unwrap().is_empty());
        assert_eq!(strategy.warned_users(), 0);
    }

    #[test]
    fn users_near_their_limit_get_warned() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let near = vec![
            MonitoredUser::new(UserId::new("A")),
            MonitoredUser::new(UserId::new("B")),
        ];
        let registry = registry(0.1, near, &notified);
        let mut strategy = WarnUsersBeforeMaxUsageTime::new(0.2, Duration::hours(1));

        strategy.apply(&registry).unwrap();
        assert_eq!(*notified.lock().unwrap(), vec![(2, UserEvent::Warn)]);
        assert_eq!(strategy.warned_users(), 2);

        strategy.apply(&registry).unwrap();
        assert_eq!(strategy.warned_users(), 4);
    }

    #[test]
    fn empty_candidate_list_only_logs() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(0.1, Vec::new(), &notified);
        let mut strategy = WarnUsersBeforeMaxUsageTime::new(0.2, Duration::hours(1));

        strategy.apply(&registry).unwrap();
        assert!(notified.lock().unwrap().is_empty());
    }
}
