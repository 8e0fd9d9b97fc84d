//! Per-host monitor worker
//!
//! One `HostMonitor` owns the [`ServerState`] of one license host and a
//! long-lived tokio task that waits for a trigger, runs the stat
//! command, parses the dump and applies it to the state.
//!
//! ## Trigger protocol
//!
//! - [`HostMonitor::monitor`] arms one cycle: it clears the result-ready
//!   edge and fires the trigger. Arming twice before the cycle finishes
//!   still yields exactly one cycle.
//! - [`HostMonitor::data`] blocks until the result-ready edge is set,
//!   then returns a snapshot of the state.
//! - [`HostMonitor::terminate`] clears the running flag, fires the
//!   trigger to unblock the worker and joins it.
//!
//! A failed cycle (empty output, no dump header) leaves the state
//! untouched but still raises the result-ready edge so a collecting
//! caller is never stranded behind a dead host.

use crate::acquisition::DumpParser;
use crate::command::CommandRunner;
use crate::fleet::SnapshotLog;
use crate::state::ServerState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to one host's monitor worker.
pub struct HostMonitor {
    hostname: String,
    trigger_tx: mpsc::Sender<()>,
    ready: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<ServerState>>,
    worker: Option<JoinHandle<()>>,
}

impl HostMonitor {
    /// Spawn the worker for `hostname`, polling via `command`.
    pub fn start(
        hostname: &str,
        command: String,
        parser: DumpParser,
        runner: Arc<dyn CommandRunner>,
        snapshot: Arc<SnapshotLog>,
    ) -> Self {
        let hostname = hostname.trim().to_uppercase();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (ready_tx, _) = watch::channel(false);
        let ready = Arc::new(ready_tx);
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(RwLock::new(ServerState::new(&hostname)));

        let worker = tokio::spawn(run_worker(WorkerContext {
            hostname: hostname.clone(),
            command,
            parser,
            runner,
            snapshot,
            trigger_rx,
            ready: Arc::clone(&ready),
            running: Arc::clone(&running),
            state: Arc::clone(&state),
        }));

        Self {
            hostname,
            trigger_tx,
            ready,
            running,
            state,
            worker: Some(worker),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Arm one monitoring cycle. Idempotent until the cycle completes.
    pub fn monitor(&self) {
        self.ready.send_replace(false);
        let _ = self.trigger_tx.try_send(());
    }

    /// Wait for the current cycle's result and return a state snapshot.
    pub async fn data(&self) -> ServerState {
        let mut rx = self.ready.subscribe();
        // Only errors when the worker side is gone; the current state is
        // the best answer either way.
        let _ = rx.wait_for(|ready| *ready).await;
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of users in the host's map right now, without waiting.
    pub fn last_scanned_users(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .user_count()
    }

    /// Stop the worker and wait for it to exit.
    pub async fn terminate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.trigger_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(host = %self.hostname, error = %e, "monitor worker did not shut down cleanly");
            }
        }
        debug!(host = %self.hostname, "host monitor terminated");
    }
}

struct WorkerContext {
    hostname: String,
    command: String,
    parser: DumpParser,
    runner: Arc<dyn CommandRunner>,
    snapshot: Arc<SnapshotLog>,
    trigger_rx: mpsc::Receiver<()>,
    ready: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<ServerState>>,
}

async fn run_worker(mut ctx: WorkerContext) {
    debug!(host = %ctx.hostname, "host monitor started");
    while ctx.running.load(Ordering::SeqCst) {
        if ctx.trigger_rx.recv().await.is_none() {
            break;
        }
        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }

        let output = ctx.runner.run(&ctx.command).await;
        let lines = output.split_lines();
        if lines.is_empty() {
            warn!(host = %ctx.hostname, command = %ctx.command, "no dump received");
            finish_cycle(&mut ctx);
            continue;
        }

        let dump = match ctx.parser.parse(&lines) {
            Ok(dump) => dump,
            Err(e) => {
                warn!(host = %ctx.hostname, error = %e, "dump not parseable, state unchanged");
                finish_cycle(&mut ctx);
                continue;
            }
        };

        {
            let mut state = ctx.state.write().unwrap_or_else(|e| e.into_inner());
            state.apply_dump(&dump);
            info!(
                host = %ctx.hostname,
                used = state.used_licenses(),
                total = state.total_licenses(),
                "licenses read"
            );
        }

        ctx.snapshot.append_dump(
            &ctx.hostname,
            dump.relevant_lines
                .iter()
                .filter_map(|&idx| lines.get(idx).map(String::as_str)),
        );

        finish_cycle(&mut ctx);
    }
    debug!(host = %ctx.hostname, "host monitor worker exited");
}

/// Swallow any re-arms that raced the cycle, then raise result-ready.
fn finish_cycle(ctx: &mut WorkerContext) {
    while ctx.trigger_rx.try_recv().is_ok() {}
    ctx.ready.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays one canned stdout per invocation, then empty output.
    struct ScriptedRunner {
        outputs: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<&str>) -> Self {
            let mut outputs: Vec<String> = outputs.into_iter().map(String::from).collect();
            outputs.reverse();
            Self {
                outputs: Mutex::new(outputs),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, _command: &str) -> CommandOutput {
            let stdout = self
                .outputs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop()
                .unwrap_or_default();
            CommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            }
        }
    }

    const DUMP_ONE: &str = "Flexible License Manager status on Tue 9/3/2013 09:52\n\
        Users of DOORS:  (Total of 10 licenses issued;  Total of 2 licenses in use)\n\
        \x20\x20\x20\x20SBX035 M1 H1 (v6.0) (H1/7587 677), start Wed 9/3 09:30\n";

    const DUMP_TWO: &str = "Flexible License Manager status on Tue 9/3/2013 10:52\n\
        Users of DOORS:  (Total of 10 licenses issued;  Total of 2 licenses in use)\n\
        \x20\x20\x20\x20SBX035 M1 H1 (v6.0) (H1/7587 677), start Wed 9/3 09:30\n";

    fn snapshot_sink() -> Arc<SnapshotLog> {
        let dir = std::env::temp_dir().join(format!("flexguard-host-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(SnapshotLog::create(dir.join("snapshots.log")).unwrap())
    }

    #[tokio::test]
    async fn cycle_applies_dump_and_publishes_result() {
        let runner = Arc::new(ScriptedRunner::new(vec![DUMP_ONE, DUMP_TWO]));
        let mut monitor = HostMonitor::start(
            "h1",
            "stat-command".to_string(),
            DumpParser::new("DOORS").unwrap(),
            runner,
            snapshot_sink(),
        );

        monitor.monitor();
        let first = monitor.data().await;
        assert_eq!(first.user_count(), 1);
        assert_eq!(first.used_licenses(), 2);
        let usage_first = first
            .user(&crate::types::UserId::new("SBX035"))
            .unwrap()
            .usage;
        assert_eq!(usage_first, chrono::Duration::minutes(22));

        monitor.monitor();
        let second = monitor.data().await;
        let usage_second = second
            .user(&crate::types::UserId::new("SBX035"))
            .unwrap()
            .usage;
        assert_eq!(usage_second, chrono::Duration::minutes(82));

        monitor.terminate().await;
    }

    #[tokio::test]
    async fn empty_output_still_raises_result_ready() {
        let runner = Arc::new(ScriptedRunner::new(vec![""]));
        let mut monitor = HostMonitor::start(
            "h1",
            "stat-command".to_string(),
            DumpParser::new("DOORS").unwrap(),
            runner,
            snapshot_sink(),
        );

        monitor.monitor();
        let state = monitor.data().await;
        assert_eq!(state.user_count(), 0);
        assert!(state.last_dump().is_none());

        monitor.terminate().await;
    }

    #[tokio::test]
    async fn terminate_joins_without_a_pending_cycle() {
        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let mut monitor = HostMonitor::start(
            "h1",
            "stat-command".to_string(),
            DumpParser::new("DOORS").unwrap(),
            runner,
            snapshot_sink(),
        );
        monitor.terminate().await;
        assert_eq!(monitor.last_scanned_users(), 0);
    }
}
