//! License-tool log backup and merge
//!
//! A service restart truncates the tool's debug log, so the restart
//! path backs the log up beforehand and merges the backup back in
//! afterwards. The merge writes to a sibling temp file and renames it
//! into place, so readers of the log never observe a truncated file.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Timestamp embedded in backup file names.
const BACKUP_STAMP_FORMAT: &str = "%Y-%m-%d_%H_%M";

/// Backs up and re-merges the license tool's log around restarts.
#[derive(Debug)]
pub struct LogSaver {
    save_dir: PathBuf,
    log_file: PathBuf,
    last_save: Option<PathBuf>,
}

impl LogSaver {
    pub fn new(save_dir: impl Into<PathBuf>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            log_file: log_file.into(),
            last_save: None,
        }
    }

    pub fn last_save(&self) -> Option<&Path> {
        self.last_save.as_deref()
    }

    /// Copy the current log to `<save_dir>/log-<stamp>.log`.
    ///
    /// Errors are logged and swallowed; a failed backup must not block
    /// the restart it precedes.
    pub fn backup_log(&mut self) {
        info!("saving license tool log");
        if !self.save_dir.exists() {
            if let Err(e) = fs::create_dir_all(&self.save_dir) {
                warn!(dir = %self.save_dir.display(), error = %e, "cannot create log save directory");
                return;
            }
        }
        if !self.log_file.exists() {
            warn!(file = %self.log_file.display(), "no log file found, nothing to backup");
            return;
        }

        let stamp = Local::now().format(BACKUP_STAMP_FORMAT);
        let target = self.save_dir.join(format!("log-{stamp}.log"));
        match fs::copy(&self.log_file, &target) {
            Ok(_) => {
                info!(file = %target.display(), "log saved");
                self.last_save = Some(target);
            }
            Err(e) => warn!(file = %target.display(), error = %e, "error during log backup"),
        }
    }

    /// Prepend the last backup to the current log, keeping chronology.
    ///
    /// The merged content lands in a temp file first and is renamed over
    /// the log, so observers always see either the old or the new file.
    pub fn merge_last_logs(&mut self) {
        let Some(last_save) = self.last_save.take() else {
            warn!("no previous saved log to merge");
            return;
        };
        info!(backup = %last_save.display(), "merging logs");

        let merge_target = self.log_file.with_extension("log.merging");
        let result = (|| -> std::io::Result<()> {
            let mut merged = fs::File::create(&merge_target)?;
            let mut backup = fs::File::open(&last_save)?;
            std::io::copy(&mut backup, &mut merged)?;
            if self.log_file.exists() {
                let mut current = fs::File::open(&self.log_file)?;
                std::io::copy(&mut current, &mut merged)?;
            }
            merged.sync_all()?;
            fs::rename(&merge_target, &self.log_file)
        })();

        match result {
            Ok(()) => info!("logs merged successfully"),
            Err(e) => {
                warn!(error = %e, "error while merging logs");
                let _ = fs::remove_file(&merge_target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_missing_log_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = LogSaver::new(dir.path().join("saves"), dir.path().join("absent.log"));
        saver.backup_log();
        assert!(saver.last_save().is_none());
    }

    #[test]
    fn backup_creates_save_dir_and_copies_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tool.log");
        fs::write(&log, "line A\n").unwrap();

        let mut saver = LogSaver::new(dir.path().join("saves"), &log);
        saver.backup_log();

        let saved = saver.last_save().expect("backup should be recorded");
        assert!(saved.starts_with(dir.path().join("saves")));
        assert_eq!(fs::read_to_string(saved).unwrap(), "line A\n");
        let name = saved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("log-") && name.ends_with(".log"));
    }

    #[test]
    fn merge_prepends_backup_to_current_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tool.log");
        fs::write(&log, "old line\n").unwrap();

        let mut saver = LogSaver::new(dir.path().join("saves"), &log);
        saver.backup_log();

        // Restart truncated and rewrote the log.
        fs::write(&log, "new line\n").unwrap();
        saver.merge_last_logs();

        assert_eq!(fs::read_to_string(&log).unwrap(), "old line\nnew line\n");
        // The backup was consumed.
        assert!(saver.last_save().is_none());
    }

    #[test]
    fn merge_without_backup_warns_and_returns() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tool.log");
        fs::write(&log, "content\n").unwrap();

        let mut saver = LogSaver::new(dir.path().join("saves"), &log);
        saver.merge_last_logs();
        assert_eq!(fs::read_to_string(&log).unwrap(), "content\n");
    }
}
