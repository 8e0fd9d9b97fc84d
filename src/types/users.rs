//! User record family
//!
//! Identifiers are case-insensitive: the license tool reports the same
//! account as `sbx035` or `SBX035` depending on the client OS. All
//! records canonicalize to upper case at construction and every map in
//! the crate is keyed by the canonical form.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default allowed-usage budget per user (hours).
pub const DEFAULT_ALLOWED_USAGE_HOURS: i64 = 10;

/// Canonical user identifier.
///
/// Construction upper-cases and trims the raw string, so two raw
/// identifiers differing only by case compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Directory identity of a user: uid plus optional display name and
/// mail address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: UserId,
    pub name: Option<String>,
    pub mail: Option<String>,
}

impl User {
    pub fn new(uid: UserId) -> Self {
        Self {
            uid,
            name: None,
            mail: None,
        }
    }

    /// Display name, falling back to the uid when none is known.
    pub fn safe_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.uid.as_str())
    }
}

/// Per-host session accounting for one user on one license server.
///
/// `usage` is the sum of every increment ever assigned on this host;
/// `increment` is the share contributed by the most recent dump. Both
/// are maintained by the accumulation algorithm in [`crate::state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub uid: UserId,
    /// Client machine the user is checked out from.
    pub machine: String,
    /// License host serving the checkout.
    pub host: String,
    /// Accumulated active usage on this host.
    pub usage: Duration,
    /// Usage added by the most recent dump.
    pub increment: Duration,
    /// Dump timestamp this record was last updated at.
    pub last_update: NaiveDateTime,
}

impl SessionUser {
    pub fn new(uid: UserId, machine: String, host: String, last_update: NaiveDateTime) -> Self {
        Self {
            uid,
            machine,
            host,
            usage: Duration::zero(),
            increment: Duration::zero(),
            last_update,
        }
    }
}

/// Fleet-wide ledger entry: total usage across hosts plus the
/// administrative state the policy strategies act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredUser {
    pub user: User,
    /// Accumulated active usage since the last reset.
    pub usage: Duration,
    /// Timestamp of the most recent dump this user appeared in.
    pub last_seen: Option<NaiveDateTime>,
    /// Client machine from the most recent sighting.
    pub machine: Option<String>,
    /// Serving host from the most recent sighting.
    pub host: Option<String>,
    pub warned: bool,
    pub banned: bool,
    /// Usage folded away by past resets (time "paid" through bans).
    pub banned_time: Duration,
    /// Allowed-usage budget before the warn/ban strategies take notice.
    pub allowed_usage: Duration,
}

impl MonitoredUser {
    pub fn new(uid: UserId) -> Self {
        Self::with_budget(uid, Duration::hours(DEFAULT_ALLOWED_USAGE_HOURS))
    }

    pub fn with_budget(uid: UserId, allowed_usage: Duration) -> Self {
        Self {
            user: User::new(uid),
            usage: Duration::zero(),
            last_seen: None,
            machine: None,
            host: None,
            warned: false,
            banned: false,
            banned_time: Duration::zero(),
            allowed_usage,
        }
    }

    pub fn uid(&self) -> &UserId {
        &self.user.uid
    }

    /// Total usage including time already folded into `banned_time`.
    pub fn total_usage(&self) -> Duration {
        self.banned_time + self.usage
    }

    /// Extend the allowed-usage budget.
    pub fn grant_usage(&mut self, additional: Duration) {
        self.allowed_usage = self.allowed_usage + additional;
    }

    /// Clearing a ban always clears the warn flag with it.
    pub fn unban(&mut self) {
        self.banned = false;
        self.warned = false;
    }
}

/// Outbound user notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Warn,
    Ban,
    Unban,
}

impl fmt::Display for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserEvent::Warn => f.write_str("warn"),
            UserEvent::Ban => f.write_str("ban"),
            UserEvent::Unban => f.write_str("unban"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_case_insensitive() {
        assert_eq!(UserId::new("sbx035"), UserId::new("SBX035"));
        assert_eq!(UserId::new(" sbx035 ").as_str(), "SBX035");
    }

    #[test]
    fn safe_name_falls_back_to_uid() {
        let mut user = User::new(UserId::new("sbx035"));
        assert_eq!(user.safe_name(), "SBX035");
        user.name = Some("Jo Fielder".to_string());
        assert_eq!(user.safe_name(), "Jo Fielder");
    }

    #[test]
    fn unban_clears_warn_flag() {
        let mut user = MonitoredUser::new(UserId::new("sbx035"));
        user.banned = true;
        user.warned = true;
        user.unban();
        assert!(!user.banned);
        assert!(!user.warned);
    }

    #[test]
    fn total_usage_includes_banned_time() {
        let mut user = MonitoredUser::new(UserId::new("sbx035"));
        user.usage = Duration::hours(2);
        user.banned_time = Duration::hours(3);
        assert_eq!(user.total_usage(), Duration::hours(5));
    }

    #[test]
    fn default_budget_is_ten_hours() {
        let user = MonitoredUser::new(UserId::new("sbx035"));
        assert_eq!(user.allowed_usage, Duration::hours(10));
    }

    #[test]
    fn granting_usage_extends_the_budget() {
        let mut user = MonitoredUser::new(UserId::new("sbx035"));
        user.grant_usage(Duration::hours(2));
        assert_eq!(user.allowed_usage, Duration::hours(12));
    }
}
