//! License-dump acquisition
//!
//! - `dump`: parses raw `lmstat` output into a [`DumpRecord`]
//! - `host`: one long-lived worker per monitored host, driving the
//!   command → parse → accumulate cycle on demand

mod dump;
mod host;

pub use dump::{DumpParser, DumpRecord, ParseError, UsageLine};
pub use host::HostMonitor;
