//! Integration tests for StateManager and the controller's single-flight guard
//!
//! These tests verify that:
//! - A second build or sanitize batch is rejected while one is in flight
//! - A build and a sanitize batch may overlap
//! - State change events are broadcast to subscribers
//! - Worker events reach the front end in order and end with a finishing event

use camino::Utf8PathBuf;
use pypack::models::{BuildConfig, BuildMode, IconPolicy, SanitizeJob, SanitizeOptions, UserConfig};
use pypack::services::{BuildEvent, Invocation, ProcessResult, SanitizeEvent, ToolRunner};
use pypack::state::{OperationInProgress, OperationKind};
use pypack::ui::{Controller, EventPump};
use pypack::{Metrics, StateChange, StateManager};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Duration, timeout};

/// Succeeds once the test releases it.
struct GatedRunner {
    gate: Arc<Notify>,
}

impl ToolRunner for GatedRunner {
    async fn run<F>(&self, _invocation: &Invocation, mut on_line: F) -> ProcessResult
    where
        F: FnMut(String) + Send,
    {
        on_line("waiting".to_string());
        self.gate.notified().await;
        on_line("released".to_string());
        ProcessResult {
            success: true,
            exit_code: Some(0),
        }
    }
}

fn script() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let script = root.join("app.py");
    fs::write(&script, "print(1)\n").unwrap();
    (temp_dir, script)
}

fn build_config(script: &Utf8PathBuf) -> BuildConfig {
    let mut config = BuildConfig::new("python", script.clone(), "app");
    config.mode = BuildMode::SingleDir;
    config.icon = IconPolicy::None;
    config
}

fn gated_controller(gate: Arc<Notify>) -> Controller<GatedRunner> {
    Controller::with_runner(
        Arc::new(StateManager::new()),
        Handle::current(),
        Arc::new(Metrics::new()),
        UserConfig::default(),
        GatedRunner { gate },
    )
}

#[test]
fn test_second_build_rejected_by_state() {
    let state = StateManager::new();

    state.try_start_build(2).unwrap();
    let err = state.try_start_build(1).unwrap_err();

    assert_eq!(err, OperationInProgress(OperationKind::Build));
    assert_eq!(err.to_string(), "A build is already running");
    assert_eq!(state.snapshot().total_steps, 2);

    state.finish_build(true, None);
    assert!(state.try_start_build(1).is_ok());
}

#[test]
fn test_second_sanitize_batch_rejected_by_state() {
    let state = StateManager::new();

    state.try_start_sanitize(3).unwrap();
    assert_eq!(
        state.try_start_sanitize(1).unwrap_err(),
        OperationInProgress(OperationKind::Sanitize)
    );
    assert!(state.try_start_build(1).is_ok());
    assert!(state.snapshot().is_busy());
}

#[tokio::test]
async fn test_state_change_events_emitted() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.try_start_sanitize(2).unwrap();
    state.add_file_result(Utf8PathBuf::from("a.py"), true, 3, 1);

    let first = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert_eq!(first, StateChange::SanitizeStarted { total_files: 2 });

    let second = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert_eq!(
        second,
        StateChange::FileSanitized {
            path: Utf8PathBuf::from("a.py"),
            success: true
        }
    );

    let snapshot = state.snapshot();
    assert_eq!(snapshot.total_comments_removed, 3);
    assert_eq!(snapshot.total_blank_lines_removed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_rejects_overlapping_builds() {
    let (_temp_dir, script) = script();
    let gate = Arc::new(Notify::new());
    let controller = gated_controller(Arc::clone(&gate));

    let mut first = controller.start_build(build_config(&script)).unwrap();
    let second = controller.start_build(build_config(&script));
    assert!(matches!(second, Err(OperationInProgress(OperationKind::Build))));

    // A sanitize batch is independent of the running build
    let sanitize = controller.start_sanitize(Vec::new());
    assert!(sanitize.is_ok());

    gate.notify_one();
    let pump = EventPump::new(1, Arc::clone(controller.metrics()));
    let mut lines = Vec::new();
    let finished = timeout(
        Duration::from_secs(10),
        pump.run(&mut first, |event| {
            if let BuildEvent::Line(line) = event {
                lines.push(line.clone());
            }
        }),
    )
    .await
    .expect("build did not finish");

    assert!(matches!(finished, Some(BuildEvent::Finished { success: true, dist_dir: Some(_) })));
    let waiting = lines.iter().position(|l| l == "waiting").unwrap();
    let released = lines.iter().position(|l| l == "released").unwrap();
    assert!(waiting < released);

    let state = controller.state().snapshot();
    assert!(!state.is_building);
    assert_eq!(state.last_build_succeeded, Some(true));
    assert_eq!(state.build_progress, 100.0);
    assert_eq!(controller.metrics().steps_succeeded.load(Ordering::Relaxed), 1);

    // The guard is released once the build has finished
    gate.notify_one();
    let mut again = controller.start_build(build_config(&script)).unwrap();
    let finished = timeout(Duration::from_secs(10), pump.run(&mut again, |_| {}))
        .await
        .expect("second build did not finish");
    assert!(matches!(finished, Some(BuildEvent::Finished { success: true, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_sanitize_updates_state() {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let good = root.join("good.py");
    let bad = root.join("bad.py");
    fs::write(&good, "x = 1  # c\n").unwrap();
    fs::write(&bad, "s = 'unterminated\n").unwrap();

    let controller = gated_controller(Arc::new(Notify::new()));
    let jobs = vec![
        SanitizeJob::new(good, SanitizeOptions::default()),
        SanitizeJob::new(bad.clone(), SanitizeOptions::default()),
    ];

    let mut rx = controller.start_sanitize(jobs).unwrap();

    let pump = EventPump::new(1, Arc::clone(controller.metrics()));
    let finished = timeout(Duration::from_secs(10), pump.run(&mut rx, |_| {}))
        .await
        .expect("batch did not finish");

    assert!(matches!(finished, Some(SanitizeEvent::Finished(s)) if s.succeeded == 1 && s.failed == 1));

    let state = controller.state().snapshot();
    assert!(!state.is_sanitizing);
    assert_eq!(state.failed_files, vec![bad]);
    assert_eq!(state.sanitized_files.len(), 1);
    assert_eq!(state.sanitize_total, 2);
    assert_eq!(state.total_comments_removed, 1);
    assert_eq!(controller.metrics().files_failed.load(Ordering::Relaxed), 1);
}
