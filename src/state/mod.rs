//! Per-host server state and usage accumulation
//!
//! One [`ServerState`] exists per monitored license host, owned by that
//! host's monitor worker. It tracks the license counters from the most
//! recent dump and a map of per-user session records whose usage grows
//! with every dump the user appears in.
//!
//! ## Accumulation
//!
//! For each usage line of a dump, the increment charged to the user is
//! the wall-clock span since their record was last touched:
//!
//! - a user never seen before is charged from their login time;
//! - a user absent in the previous dump has their session treated as
//!   starting at the new login time, not the stale last update;
//! - a user appearing twice in the same dump (concurrent seats on the
//!   same host) is charged one extra inter-dump interval per extra
//!   seat, on top of the increment already applied this dump.
//!
//! Increments are never negative for a monotone dump stream, and a
//! record's `usage` is exactly the sum of all increments it was ever
//! assigned.

use crate::acquisition::DumpRecord;
use crate::types::{SessionUser, UserId};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// License counters and per-user sessions for one host.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    hostname: String,
    used_licenses: u32,
    total_licenses: u32,
    last_dump: Option<NaiveDateTime>,
    users: HashMap<UserId, SessionUser>,
}

impl ServerState {
    /// Create an empty state for `hostname` (canonicalized to upper case).
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.trim().to_uppercase(),
            ..Self::default()
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn used_licenses(&self) -> u32 {
        self.used_licenses
    }

    pub fn total_licenses(&self) -> u32 {
        self.total_licenses
    }

    pub fn last_dump(&self) -> Option<NaiveDateTime> {
        self.last_dump
    }

    pub fn users(&self) -> &HashMap<UserId, SessionUser> {
        &self.users
    }

    pub fn user(&self, uid: &UserId) -> Option<&SessionUser> {
        self.users.get(uid)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Apply a parsed dump: all usage lines, then the license counters
    /// and the dump timestamp.
    ///
    /// A dump without a totals line keeps the previously stored counts.
    pub fn apply_dump(&mut self, dump: &DumpRecord) {
        for line in &dump.usage {
            self.apply_usage(
                dump.timestamp,
                line.uid.clone(),
                line.login,
                &line.machine,
                &line.host,
            );
        }
        if dump.has_totals {
            self.used_licenses = dump.in_use;
            self.total_licenses = dump.issued;
        }
        self.last_dump = Some(dump.timestamp);
    }

    /// Charge one usage line against this state.
    ///
    /// `self.last_dump` still refers to the *previous* dump while lines
    /// of the current dump are applied; [`Self::apply_dump`] advances it
    /// only after every line has been charged.
    pub fn apply_usage(
        &mut self,
        dump_ts: NaiveDateTime,
        uid: UserId,
        login: NaiveDateTime,
        machine: &str,
        host: &str,
    ) {
        let prev_dump = self.last_dump;
        match self.users.get_mut(&uid) {
            None => {
                let mut user =
                    SessionUser::new(uid.clone(), machine.to_string(), host.to_string(), dump_ts);
                let increment = dump_ts - login;
                user.usage = increment;
                user.increment = increment;
                self.users.insert(uid, user);
            }
            Some(user) => {
                // Absent in the previous dump: the old session ended, so
                // charge from the new login instead of the stale update.
                if let Some(prev) = prev_dump {
                    if user.last_update < prev {
                        user.last_update = login;
                    }
                }

                let mut increment = dump_ts - user.last_update;

                // Already updated at this dump timestamp: a second
                // concurrent seat. Charge one more inter-dump interval
                // on top of what this dump already added.
                if user.last_update == dump_ts {
                    let delta = match prev_dump {
                        None => dump_ts - login,
                        Some(prev) => dump_ts - prev,
                    };
                    increment = user.increment + delta;
                }

                user.machine = machine.to_string();
                user.host = host.to_string();
                user.usage = user.usage + increment;
                user.increment = increment;
                user.last_update = dump_ts;
            }
        }
    }

    /// Drop one user's session record.
    pub fn reset_user(&mut self, uid: &UserId) -> Option<SessionUser> {
        self.users.remove(uid)
    }

    /// Drop every session record.
    pub fn reset_usage(&mut self) {
        self.users.clear();
    }
}
