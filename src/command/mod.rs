//! External command execution
//!
//! The license tool is driven entirely through its command line, so the
//! whole data plane sits behind one seam: [`CommandRunner`]. Production
//! code uses [`ShellRunner`]; tests substitute a scripted runner that
//! replays canned dumps.
//!
//! A nonzero exit is not an error at this seam. Callers inspect
//! [`CommandOutput::has_errors`], which treats a nonzero exit code or
//! any stderr output as a failed invocation.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of one command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// True when the command exited nonzero or wrote to stderr.
    pub fn has_errors(&self) -> bool {
        self.exit_code != 0 || !self.stderr.is_empty()
    }

    /// Best-effort error text: stderr, falling back to stdout when the
    /// tool reports failures on the wrong stream.
    pub fn errors(&self) -> &str {
        if self.has_errors() && self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Stdout split into lines with trailing whitespace removed.
    ///
    /// Leading whitespace is preserved: the dump format distinguishes
    /// usage lines from headers by their indentation.
    pub fn split_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect()
    }
}

/// Seam for invoking external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through the platform shell and capture its output.
    ///
    /// Never fails: a spawn error is folded into a [`CommandOutput`]
    /// with a nonzero exit code and the error text on stderr.
    async fn run(&self, command: &str) -> CommandOutput;
}

/// Exit code reported when the shell itself could not be spawned.
const SPAWN_FAILURE_EXIT: i32 = 127;

/// Runs commands through `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        let mut shell = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        let output = shell
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) => CommandOutput {
                exit_code: out.status.code().unwrap_or(SPAWN_FAILURE_EXIT),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            },
            Err(e) => CommandOutput {
                exit_code: SPAWN_FAILURE_EXIT,
                stdout: String::new(),
                stderr: format!("failed to spawn shell: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_exit_has_errors() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(out.has_errors());
    }

    #[test]
    fn stderr_output_has_errors_even_on_zero_exit() {
        let out = CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: "warning: something".to_string(),
        };
        assert!(out.has_errors());
    }

    #[test]
    fn errors_falls_back_to_stdout() {
        let out = CommandOutput {
            exit_code: 2,
            stdout: "the real message".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.errors(), "the real message");
    }

    #[test]
    fn split_lines_preserves_indentation() {
        let out = CommandOutput {
            exit_code: 0,
            stdout: "header\n    indented line   \n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.split_lines(), vec!["header", "    indented line"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_captures_stdout_and_exit() {
        let out = ShellRunner.run("echo hello").await;
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.has_errors());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_reports_nonzero_exit() {
        let out = ShellRunner.run("exit 3").await;
        assert_eq!(out.exit_code, 3);
        assert!(out.has_errors());
    }
}
