//! Shared dump-snapshot sink
//!
//! Every host monitor appends the relevant slice of each dump it
//! parses, so operators can replay exactly what the accounting saw.
//! The sink is shared across hosts; the mutex keeps a whole dump block
//! (header, lines, footer) contiguous in the file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Append-only snapshot log shared by all host monitors.
#[derive(Debug)]
pub struct SnapshotLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl SnapshotLog {
    /// Open (or create) the snapshot file in append mode.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one dump block atomically with respect to other dumps.
    ///
    /// Write errors are logged and swallowed: losing a snapshot line
    /// must not take a monitor cycle down with it.
    pub fn append_dump<'a>(&self, host: &str, lines: impl Iterator<Item = &'a str>) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let result = (|| -> std::io::Result<()> {
            writeln!(writer, "New dump from {host}")?;
            for line in lines {
                writeln!(writer, "{line}")?;
            }
            writeln!(writer, "End of dump")?;
            writer.flush()
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to append dump snapshot");
        }
    }
}
