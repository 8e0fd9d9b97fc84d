//! Fleet monitoring cycle against a scripted license tool
//!
//! Exercises the trigger/collect protocol end to end: fleet manager →
//! host monitors → command runner → dump parser → server state →
//! user ledger, without a real `lmutil` anywhere near the test.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use flexguard::command::{CommandOutput, CommandRunner};
use flexguard::config::FleetConfig;
use flexguard::fleet::{FleetManager, LogSaver, SnapshotLog, UserLedger};
use flexguard::types::UserId;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ============================================================================
// Scripted command runner
// ============================================================================

/// Replays canned stdout per host, matching commands by substring.
struct ScriptedRunner {
    scripts: Mutex<HashMap<&'static str, VecDeque<&'static str>>>,
}

impl ScriptedRunner {
    fn new(scripts: HashMap<&'static str, VecDeque<&'static str>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        let mut scripts = self.scripts.lock().unwrap();
        let stdout = scripts
            .iter_mut()
            .find(|(host, _)| command.contains(*host))
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_default();
        CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const LIC01_DUMP_1: &str = "\
Flexible License Manager status on Tue 9/3/2013 09:52

Users of DOORS:  (Total of 56 licenses issued;  Total of 39 licenses in use)

    SBX035 VSDS-L0150 LIC01 (v6.0) (LIC01/19353 677), start Wed 9/3 09:30
    SBA151 VSDS-L0240 LIC01 (v6.0) (LIC01/19353 212), start Wed 9/3 08:52
";

const LIC01_DUMP_2: &str = "\
Flexible License Manager status on Tue 9/3/2013 10:52

Users of DOORS:  (Total of 56 licenses issued;  Total of 40 licenses in use)

    SBX035 VSDS-L0150 LIC01 (v6.0) (LIC01/19353 677), start Wed 9/3 09:30
";

const LIC02_DUMP_1: &str = "\
Flexible License Manager status on Tue 9/3/2013 09:52

Users of DOORS:  (Total of 10 licenses issued;  Total of 1 licenses in use)

    sbx035 VSDS-L0150 LIC02 (v6.0) (LIC02/19353 14), start Wed 9/3 09:40
";

fn fleet_config(workdir: &TempDir, hosts: &[&str]) -> FleetConfig {
    // The manager asserts the tool path exists.
    let tool_path = workdir.path().join("lmutil");
    std::fs::write(&tool_path, b"").unwrap();
    FleetConfig {
        current_host: hosts[0].to_string(),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        feature: "DOORS".to_string(),
        tool_path,
        vendor: "telelogic".to_string(),
        option_file: workdir.path().join("telelogic.opt"),
        port: 19353,
        service_name: "FLEXlm License Manager".to_string(),
        mock: true,
    }
}

fn build_fleet(
    workdir: &TempDir,
    hosts: &[&str],
    runner: Arc<dyn CommandRunner>,
) -> (FleetManager, Arc<Mutex<UserLedger>>, PathBuf) {
    let snapshot_path = workdir.path().join("snapshots.log");
    let snapshot = Arc::new(SnapshotLog::create(&snapshot_path).unwrap());
    let log_saver = LogSaver::new(
        workdir.path().join("log-backups"),
        workdir.path().join("flexlm.log"),
    );
    let ledger = Arc::new(Mutex::new(UserLedger::new(Duration::hours(10))));
    let fleet = FleetManager::new(
        fleet_config(workdir, hosts),
        log_saver,
        runner,
        snapshot,
        Arc::clone(&ledger),
    )
    .unwrap();
    (fleet, ledger, snapshot_path)
}

fn ts(h: u32, m: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 9, 3)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn two_cycles_accumulate_usage_in_the_ledger() {
    let workdir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(HashMap::from([(
        "LIC01",
        VecDeque::from([LIC01_DUMP_1, LIC01_DUMP_2]),
    )])));
    let (mut fleet, ledger, _) = build_fleet(&workdir, &["LIC01"], runner);

    fleet.monitor_license().await;
    {
        let ledger = ledger.lock().unwrap();
        // 22 minutes since the 09:30 login.
        assert_eq!(
            ledger.user(&UserId::new("SBX035")).unwrap().usage,
            Duration::minutes(22)
        );
        assert_eq!(
            ledger.user(&UserId::new("SBA151")).unwrap().usage,
            Duration::minutes(60)
        );
        assert_eq!(ledger.latest_dump(), Some(ts(9, 52)));
    }
    assert_eq!(fleet.last_dump(), Some(ts(9, 52)));

    fleet.monitor_license().await;
    {
        let ledger = ledger.lock().unwrap();
        // One more hour for the user still connected.
        assert_eq!(
            ledger.user(&UserId::new("SBX035")).unwrap().usage,
            Duration::minutes(82)
        );
        // The departed user keeps what they accumulated.
        assert_eq!(
            ledger.user(&UserId::new("SBA151")).unwrap().usage,
            Duration::minutes(60)
        );
        assert_eq!(ledger.latest_dump(), Some(ts(10, 52)));
    }
    assert_eq!(fleet.last_dump(), Some(ts(10, 52)));

    // Host lookup is case-insensitive; unknown hosts yield nothing.
    let state = fleet.server_data("lic01").await.unwrap();
    assert_eq!(state.user_count(), 2);
    assert_eq!(state.used_licenses(), 40);
    assert!(fleet.server_data("nowhere").await.is_none());

    fleet.terminate().await;
}

#[tokio::test]
async fn usage_for_the_same_user_sums_across_hosts() {
    let workdir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(HashMap::from([
        ("LIC01", VecDeque::from([LIC01_DUMP_1])),
        ("LIC02", VecDeque::from([LIC02_DUMP_1])),
    ])));
    let (mut fleet, ledger, _) = build_fleet(&workdir, &["LIC01", "LIC02"], runner);

    fleet.monitor_license().await;

    let ledger = ledger.lock().unwrap();
    // 22 minutes on LIC01 plus 12 minutes on LIC02, case-insensitively.
    assert_eq!(
        ledger.user(&UserId::new("sbx035")).unwrap().usage,
        Duration::minutes(34)
    );
    // 39+1 used of 56+10 issued.
    let free = ledger.free_percentage();
    assert!((free - (26.0 / 66.0)).abs() < 1e-9);

    fleet.terminate().await;
}

#[tokio::test]
async fn snapshot_log_replays_the_relevant_dump_lines() {
    let workdir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(HashMap::from([(
        "LIC01",
        VecDeque::from([LIC01_DUMP_1]),
    )])));
    let (mut fleet, _, snapshot_path) = build_fleet(&workdir, &["LIC01"], runner);

    fleet.monitor_license().await;
    fleet.terminate().await;

    let content = std::fs::read_to_string(&snapshot_path).unwrap();
    assert!(content.starts_with("New dump from LIC01\n"));
    assert!(content.contains("Flexible License Manager status on Tue 9/3/2013 09:52"));
    assert!(content.contains("Users of DOORS"));
    assert!(content.contains("SBX035"));
    assert!(content.trim_end().ends_with("End of dump"));
    // Blank separator lines did not contribute to the parse.
    assert!(!content.contains("\n\n"));
}

#[tokio::test]
async fn failed_host_skips_the_cycle_but_does_not_stall_the_fleet() {
    let workdir = tempfile::tempdir().unwrap();
    // LIC01 answers; LIC02 yields empty output on every call.
    let runner = Arc::new(ScriptedRunner::new(HashMap::from([
        ("LIC01", VecDeque::from([LIC01_DUMP_1])),
        ("LIC02", VecDeque::new()),
    ])));
    let (mut fleet, ledger, _) = build_fleet(&workdir, &["LIC01", "LIC02"], runner);

    fleet.monitor_license().await;

    let ledger = ledger.lock().unwrap();
    assert!(ledger.user(&UserId::new("SBX035")).is_some());
    drop(ledger);

    fleet.terminate().await;
}

#[tokio::test]
async fn is_alive_requires_a_positive_issued_count() {
    let workdir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new(HashMap::from([(
        "LIC01",
        VecDeque::from([
            LIC01_DUMP_1,
            "Users of DOORS:  (Total of 0 licenses issued;  Total of 0 licenses in use)\n",
            "lmstat: cannot connect to license server\n",
        ]),
    )])));
    let (mut fleet, _, _) = build_fleet(&workdir, &["LIC01"], runner);

    assert!(fleet.is_alive("LIC01").await);
    assert!(!fleet.is_alive("LIC01").await);
    assert!(!fleet.is_alive("LIC01").await);

    fleet.terminate().await;
}

#[tokio::test]
async fn missing_tool_path_fails_construction() {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = fleet_config(&workdir, &["LIC01"]);
    config.tool_path = workdir.path().join("no-such-lmutil");

    let snapshot = Arc::new(SnapshotLog::create(workdir.path().join("snapshots.log")).unwrap());
    let log_saver = LogSaver::new(
        workdir.path().join("log-backups"),
        workdir.path().join("flexlm.log"),
    );
    let ledger = Arc::new(Mutex::new(UserLedger::new(Duration::hours(10))));
    let runner = Arc::new(ScriptedRunner::new(HashMap::new()));

    assert!(FleetManager::new(config, log_saver, runner, snapshot, ledger).is_err());
}
