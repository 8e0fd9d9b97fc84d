//! lmstat dump parser
//!
//! A dump is the textual status report the license tool prints for one
//! host. The sections recognized, in order:
//!
//! ```text
//! Flexible License Manager status on Tue 9/3/2013 09:52
//! ...
//! Users of DOORS:  (Total of 56 licenses issued;  Total of 39 licenses in use)
//! ...
//!     SBX035 VSDS-BIE-L0150 VSDS-BIE-L0150 (v6.000000) (VSDS-BIE-S002/7587 677), start Wed 4/12 14:58
//!     rebecca.woodard.ext doorsts VIC-HUD-L017 telelogic (v2009.0602) (bie-pvcs-01/19353 3344), start Mon 3/21 16:37
//! ```
//!
//! The header date carries the year; login dates do not, so each login
//! timestamp borrows the year of the dump header. A second `Users of`
//! line terminates the monitored feature's section. Lines that fed the
//! parse are recorded by index so the snapshot log can replay exactly
//! the relevant slice of the dump.

use crate::types::UserId;
use chrono::{Datelike, NaiveDateTime};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Dump header date format: `M/D/YYYY H:MM`.
const HEADER_DATE_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Login date format once the dump year is prepended: `YYYY/M/D H:MM`.
const LOGIN_DATE_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Parser failures. Anything softer than a missing header degrades to
/// skipped lines, not an error.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no dump date header found")]
    MissingHeader,

    #[error("unreadable dump timestamp {raw:?}: {message}")]
    InvalidTimestamp { raw: String, message: String },
}

/// One checkout reported by the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLine {
    pub uid: UserId,
    /// Client machine the checkout runs on.
    pub machine: String,
    /// License host serving the checkout.
    pub host: String,
    /// Login timestamp, completed with the dump year.
    pub login: NaiveDateTime,
}

/// Structured result of parsing one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub timestamp: NaiveDateTime,
    /// Licenses issued for the monitored feature.
    pub issued: u32,
    /// Licenses in use for the monitored feature.
    pub in_use: u32,
    /// Whether the dump carried a totals line for the feature. Without
    /// one, `issued`/`in_use` are zero and previously stored counts
    /// should be kept.
    pub has_totals: bool,
    pub usage: Vec<UsageLine>,
    /// Indices of the input lines whose match contributed to this record.
    pub relevant_lines: Vec<usize>,
}

/// Compiled patterns for one feature name.
#[derive(Debug)]
pub struct DumpParser {
    feature: String,
    header: Regex,
    totals: Regex,
    user_data: Regex,
    feature_line: Regex,
}

impl DumpParser {
    /// Build a parser for `feature` (e.g. `DOORS`).
    ///
    /// The patterns are fixed apart from the feature name, so compiling
    /// them cannot fail for any feature that survives config validation.
    pub fn new(feature: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            feature: feature.to_string(),
            header: Regex::new(
                r"^\s*Flexible License Manager status on.+?(\d+/\d+/\d+\s\d+:\d+)\s*",
            )?,
            totals: Regex::new(&format!(
                r"^Users of {}.*?Total of (\d+) licenses issued.*?Total of (\d+) licenses in use.*",
                regex::escape(feature)
            ))?,
            user_data: Regex::new(
                r"^\s+([\w.-]+)\s+([\w-]+)\s+([\w-]+?)\s+([\w -]*)\(.+\)\s\(.+\), start \w+ (\d+/\d+\s\d+:\d+)\s*",
            )?,
            feature_line: Regex::new(r"^Users of\s.*")?,
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Parse the ordered dump lines into a [`DumpRecord`].
    pub fn parse(&self, lines: &[String]) -> Result<DumpRecord, ParseError> {
        let mut timestamp: Option<NaiveDateTime> = None;
        let mut in_feature = false;
        let mut issued = 0u32;
        let mut in_use = 0u32;
        let mut usage = Vec::new();
        let mut relevant_lines = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }

            // The first header line fixes the dump timestamp; later
            // header lines are ordinary text.
            if timestamp.is_none() {
                if let Some(caps) = self.header.captures(line) {
                    let raw = &caps[1];
                    let parsed = NaiveDateTime::parse_from_str(raw, HEADER_DATE_FORMAT).map_err(
                        |e| ParseError::InvalidTimestamp {
                            raw: raw.to_string(),
                            message: e.to_string(),
                        },
                    )?;
                    debug!(line = %line.trim(), "dump header matched");
                    timestamp = Some(parsed);
                    relevant_lines.push(index);
                }
                continue;
            }

            if !in_feature {
                if let Some(caps) = self.totals.captures(line) {
                    in_feature = true;
                    issued = caps[1].parse().unwrap_or(0);
                    in_use = caps[2].parse().unwrap_or(0);
                    relevant_lines.push(index);
                }
                continue;
            }

            if let Some(caps) = self.user_data.captures(line) {
                // Login dates carry no year; borrow it from the header.
                let dump_year = timestamp.map_or(0, |t| t.year());
                let raw_login = format!("{}/{}", dump_year, &caps[5]);
                match NaiveDateTime::parse_from_str(&raw_login, LOGIN_DATE_FORMAT) {
                    Ok(login) => {
                        usage.push(UsageLine {
                            uid: UserId::new(&caps[1]),
                            machine: caps[2].to_string(),
                            host: caps[3].to_string(),
                            login,
                        });
                        relevant_lines.push(index);
                    }
                    Err(e) => {
                        debug!(line = %line.trim(), error = %e, "skipping unparseable usage line");
                    }
                }
            } else if self.feature_line.is_match(line) {
                // Next feature's section begins; ours is done.
                break;
            }
        }

        let timestamp = timestamp.ok_or(ParseError::MissingHeader)?;
        Ok(DumpRecord {
            timestamp,
            issued,
            in_use,
            // The flag never resets once the totals line matched.
            has_totals: in_feature,
            usage,
            relevant_lines,
        })
    }
}
