//! Shared data structures for license-pool monitoring
//!
//! This module defines the core types flowing through the monitoring
//! pipeline:
//! - `UserId`: canonical case-insensitive user identifier
//! - `User`: directory identity (uid, display name, mail address)
//! - `SessionUser`: per-host session accounting (machine, serving host,
//!   accumulated usage, per-dump increment)
//! - `MonitoredUser`: fleet-wide usage ledger entry with warn/ban state
//! - `UserEvent`: the outbound notification kinds (warn, ban, unban)

mod users;

pub use users::*;

use chrono::Duration;

/// Decimal places used when rendering durations as hours.
const HOUR_PRECISION: i32 = 2;

/// Convert a duration to decimal hours, rounded to two places.
///
/// Used in log lines and mail bodies where "8.25 h" reads better than
/// a seconds count.
pub fn decimal_hours(duration: Duration) -> f64 {
    let hours = duration.num_seconds() as f64 / 3600.0;
    let factor = 10f64.powi(HOUR_PRECISION);
    (hours * factor).round() / factor
}

/// Render a duration as decimal hours with the unit suffix.
pub fn fmt_hours(duration: Duration) -> String {
    format!("{:.2} h", decimal_hours(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_hours_rounds_to_two_places() {
        assert_eq!(decimal_hours(Duration::minutes(90)), 1.5);
        assert_eq!(decimal_hours(Duration::seconds(3600)), 1.0);
        assert_eq!(decimal_hours(Duration::seconds(4000)), 1.11);
        assert_eq!(decimal_hours(Duration::zero()), 0.0);
    }

    #[test]
    fn fmt_hours_includes_unit() {
        assert_eq!(fmt_hours(Duration::minutes(30)), "0.50 h");
    }
}
