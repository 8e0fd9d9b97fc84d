//! Fleet-wide user ledger
//!
//! Host monitors accumulate usage per host; the ledger folds each
//! cycle's per-dump increments into one table covering the whole pool.
//! The policy strategies read and mutate this table exclusively through
//! service callbacks, so it sits behind a mutex owned by the fleet
//! manager.
//!
//! A dump is merged at most once per host: re-publishing an unchanged
//! state (e.g. after a failed cycle) must not double-charge anyone.

use crate::state::ServerState;
use crate::types::{MonitoredUser, UserEvent, UserId};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Aggregated per-user usage and license capacity across the fleet.
#[derive(Debug)]
pub struct UserLedger {
    users: HashMap<UserId, MonitoredUser>,
    banned: HashSet<UserId>,
    /// `(used, total)` license counts per host.
    capacity: HashMap<String, (u32, u32)>,
    /// Last dump timestamp merged per host.
    merged: HashMap<String, NaiveDateTime>,
    latest_dump: Option<NaiveDateTime>,
    default_budget: Duration,
}

impl UserLedger {
    pub fn new(default_budget: Duration) -> Self {
        Self {
            users: HashMap::new(),
            banned: HashSet::new(),
            capacity: HashMap::new(),
            merged: HashMap::new(),
            latest_dump: None,
            default_budget,
        }
    }

    pub fn latest_dump(&self) -> Option<NaiveDateTime> {
        self.latest_dump
    }

    pub fn user(&self, uid: &UserId) -> Option<&MonitoredUser> {
        self.users.get(uid)
    }

    pub fn users(&self) -> impl Iterator<Item = &MonitoredUser> {
        self.users.values()
    }

    pub fn banned(&self) -> &HashSet<UserId> {
        &self.banned
    }

    /// Total number of users the ledger has ever accounted.
    pub fn total_users(&self) -> usize {
        self.users.len()
    }

    /// Fold one host's published state into the ledger.
    ///
    /// Only records updated by the host's most recent dump contribute,
    /// and each dump timestamp is consumed once per host.
    pub fn merge_dump(&mut self, state: &ServerState) {
        self.capacity.insert(
            state.hostname().to_string(),
            (state.used_licenses(), state.total_licenses()),
        );

        let Some(dump_ts) = state.last_dump() else {
            return;
        };
        if self
            .merged
            .get(state.hostname())
            .is_some_and(|&seen| seen >= dump_ts)
        {
            debug!(host = state.hostname(), "dump already merged, skipping");
            return;
        }
        self.merged.insert(state.hostname().to_string(), dump_ts);
        if self.latest_dump.map_or(true, |latest| dump_ts > latest) {
            self.latest_dump = Some(dump_ts);
        }

        for (uid, session) in state.users() {
            // Stale records describe sessions that ended before this dump.
            if session.last_update != dump_ts {
                continue;
            }
            let entry = self
                .users
                .entry(uid.clone())
                .or_insert_with(|| MonitoredUser::with_budget(uid.clone(), self.default_budget));
            entry.usage = entry.usage + session.increment;
            entry.last_seen = Some(dump_ts);
            entry.machine = Some(session.machine.clone());
            entry.host = Some(session.host.clone());
        }
    }

    /// Fleet-wide free-license ratio: `(total − used) / total`.
    ///
    /// An empty or zero-capacity fleet counts as fully free.
    pub fn free_percentage(&self) -> f64 {
        let (used, total) = self
            .capacity
            .values()
            .fold((0u64, 0u64), |(u, t), &(used, total)| {
                (u + u64::from(used), t + u64::from(total))
            });
        if total == 0 {
            return 1.0;
        }
        (total - used) as f64 / total as f64
    }

    /// Users eligible for banning: active in the most recent dump and
    /// not already banned, longest accumulated usage first.
    pub fn ban_candidates(&self) -> Vec<MonitoredUser> {
        let Some(latest) = self.latest_dump else {
            return Vec::new();
        };
        let mut candidates: Vec<MonitoredUser> = self
            .users
            .values()
            .filter(|u| !u.banned && u.last_seen == Some(latest))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.usage.cmp(&a.usage).then_with(|| a.uid().cmp(b.uid())));
        candidates
    }

    /// Users within `warn_delay` of exhausting their budget that have
    /// not been warned or banned yet.
    pub fn warn_candidates(&self, warn_delay: Duration) -> Vec<MonitoredUser> {
        let mut candidates: Vec<MonitoredUser> = self
            .users
            .values()
            .filter(|u| !u.banned && !u.warned && u.usage + warn_delay >= u.allowed_usage)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.usage.cmp(&a.usage).then_with(|| a.uid().cmp(b.uid())));
        candidates
    }

    /// Reset a user's accumulated usage, folding it into banned time,
    /// and clear their administrative flags.
    pub fn reset_user(&mut self, uid: &UserId, when: NaiveDateTime) {
        if let Some(user) = self.users.get_mut(uid) {
            user.banned_time = user.banned_time + user.usage;
            user.usage = Duration::zero();
            user.unban();
            user.last_seen = Some(when);
        }
        self.banned.remove(uid);
    }

    /// Apply the administrative side of a user event to the ledger.
    pub fn apply_event(&mut self, uids: &[UserId], event: UserEvent) {
        for uid in uids {
            let entry = self
                .users
                .entry(uid.clone())
                .or_insert_with(|| MonitoredUser::with_budget(uid.clone(), self.default_budget));
            match event {
                UserEvent::Warn => entry.warned = true,
                UserEvent::Ban => {
                    entry.banned = true;
                    self.banned.insert(uid.clone());
                }
                UserEvent::Unban => {
                    entry.unban();
                    self.banned.remove(uid);
                }
            }
        }
    }
}
