//! Integration tests for BuildOrchestrator with a scripted tool runner
//!
//! These tests verify that the orchestrator:
//! - Runs `both` as onedir then onefile
//! - Stops at the first failing step
//! - Keeps progress monotonic and only reaches 100 on full success
//! - Rejects invalid requests before cleanup or any subprocess
//! - Removes stale artifacts before the first step

use camino::{Utf8Path, Utf8PathBuf};
use pypack::models::{BuildConfig, BuildMode, BuildStep, ConfigError, IconPolicy};
use pypack::services::{
    BuildError, BuildEvent, BuildOrchestrator, BuildPhase, CommandBuilder, Invocation,
    ProcessResult, ToolRunner,
};
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Records every invocation and answers with pre-scripted exit statuses.
struct ScriptedRunner {
    outcomes: Vec<bool>,
    lines_per_run: usize,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    fn new(outcomes: &[bool], lines_per_run: usize) -> Self {
        Self {
            outcomes: outcomes.to_vec(),
            lines_per_run,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolRunner for ScriptedRunner {
    async fn run<F>(&self, invocation: &Invocation, mut on_line: F) -> ProcessResult
    where
        F: FnMut(String) + Send,
    {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(invocation.clone());
            calls.len() - 1
        };

        for i in 0..self.lines_per_run {
            on_line(format!("run {call} line {i}"));
        }

        let success = self.outcomes.get(call).copied().unwrap_or(true);
        ProcessResult {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
        }
    }
}

struct Fixture {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::write(root.join("app.py"), "print('hello')\n").unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    fn config(&self, mode: BuildMode) -> BuildConfig {
        let mut config = BuildConfig::new("python", self.root.join("app.py"), "app");
        config.mode = mode;
        config.icon = IconPolicy::None;
        config
    }
}

fn drain(rx: &mut UnboundedReceiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn progress_values(events: &[BuildEvent]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn lines(events: &[BuildEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::Line(l) => Some(l.as_str()),
            _ => None,
        })
        .collect()
}

fn step_flag(invocation: &Invocation) -> &str {
    invocation
        .args
        .iter()
        .find(|a| *a == "--onefile" || *a == "--onedir")
        .map(String::as_str)
        .unwrap_or("")
}

#[tokio::test]
async fn test_both_runs_onedir_then_onefile() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true, true], 3), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let dist = orchestrator
        .run(fixture.config(BuildMode::Both), &tx)
        .await
        .unwrap();

    let calls = orchestrator.runner().calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(step_flag(&calls[0]), "--onedir");
    assert_eq!(step_flag(&calls[1]), "--onefile");
    assert_eq!(dist, fixture.root.join("dist"));

    let events = drain(&mut rx);
    let phases: Vec<&BuildPhase> = events
        .iter()
        .filter_map(|e| match e {
            BuildEvent::Phase(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            &BuildPhase::Cleaning,
            &BuildPhase::Running {
                index: 1,
                total: 2,
                step: BuildStep::OneDir
            },
            &BuildPhase::Running {
                index: 2,
                total: 2,
                step: BuildStep::OneFile
            },
            &BuildPhase::Succeeded,
        ]
    );

    let lines = lines(&events);
    assert_eq!(lines[0], ">>> Cleaning previous build artifacts...");
    assert!(lines.contains(&">>> Step 1/2: onedir ..."));
    assert!(lines.contains(&"Icon: none"));
    assert!(lines.iter().any(|l| l.starts_with("Cmd: python -m PyInstaller ")));
    assert!(lines.contains(&"run 1 line 2"));
    assert_eq!(
        lines.last().copied(),
        Some(format!("✓ Build finished! Output: {}", dist).as_str())
    );
}

#[tokio::test]
async fn test_first_failure_skips_remaining_steps() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[false, true], 1), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let result = orchestrator.run(fixture.config(BuildMode::Both), &tx).await;

    assert!(matches!(
        result,
        Err(BuildError::StepFailed {
            index: 1,
            step: BuildStep::OneDir,
            exit_code: Some(1)
        })
    ));
    assert_eq!(orchestrator.runner().calls().len(), 1);

    let events = drain(&mut rx);
    assert!(events.contains(&BuildEvent::Phase(BuildPhase::Failed)));
    assert!(!events.contains(&BuildEvent::Phase(BuildPhase::Succeeded)));
    assert!(lines(&events).contains(&"✗ Build failed, remaining steps skipped."));
    assert!(progress_values(&events).iter().all(|p| *p < 100.0));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_on_success() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true, true], 700), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    orchestrator
        .run(fixture.config(BuildMode::Both), &tx)
        .await
        .unwrap();

    let progress = progress_values(&drain(&mut rx));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(100.0));

    let before_completion = &progress[..progress.len() - 1];
    assert!(before_completion.iter().all(|p| *p <= 95.0));
    assert_eq!(before_completion.last().copied(), Some(95.0));
}

#[tokio::test]
async fn test_progress_never_completes_on_partial_success() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true, false], 2000), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let result = orchestrator.run(fixture.config(BuildMode::Both), &tx).await;
    assert!(matches!(result, Err(BuildError::StepFailed { index: 2, .. })));

    let progress = progress_values(&drain(&mut rx));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| *p < 100.0));
}

#[tokio::test]
async fn test_missing_script_is_rejected_before_anything_runs() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.root.join("dist")).unwrap();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[], 0), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let config = BuildConfig::new("python", fixture.root.join("missing.py"), "app");
    let result = orchestrator.run(config, &tx).await;

    assert!(matches!(
        result,
        Err(BuildError::Config(ConfigError::ScriptNotFound(_)))
    ));
    assert!(orchestrator.runner().calls().is_empty());
    assert!(drain(&mut rx).is_empty());
    assert!(fixture.root.join("dist").exists());
}

#[tokio::test]
async fn test_empty_output_name_is_rejected() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[], 0), CommandBuilder::default());
    let (tx, _rx) = mpsc::unbounded_channel();

    let config = BuildConfig::new("python", fixture.root.join("app.py"), "   ");
    let result = orchestrator.run(config, &tx).await;

    assert!(matches!(
        result,
        Err(BuildError::Config(ConfigError::EmptyOutputName))
    ));
    assert!(orchestrator.runner().calls().is_empty());
}

#[tokio::test]
async fn test_stale_artifacts_removed_before_first_step() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.root.join("build/app")).unwrap();
    fs::create_dir_all(fixture.root.join("dist/app")).unwrap();
    fs::create_dir_all(fixture.root.join("__pycache__")).unwrap();
    fs::write(fixture.root.join("app.spec"), "# old").unwrap();

    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true], 0), CommandBuilder::default());
    let (tx, _rx) = mpsc::unbounded_channel();

    orchestrator
        .run(fixture.config(BuildMode::SingleFile), &tx)
        .await
        .unwrap();

    for stale in ["build", "dist", "__pycache__", "app.spec"] {
        assert!(!fixture.root.join(stale).exists(), "{stale} should be removed");
    }
    assert!(fixture.root.join("app.py").exists());
}

#[tokio::test]
async fn test_cleanup_tolerates_missing_artifacts() {
    let fixture = Fixture::new();
    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true], 0), CommandBuilder::default());
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = orchestrator
        .run(fixture.config(BuildMode::SingleDir), &tx)
        .await;

    assert!(result.is_ok());
    assert_eq!(orchestrator.runner().calls().len(), 1);
}

#[tokio::test]
async fn test_custom_icon_is_reported_and_passed() {
    let fixture = Fixture::new();
    let icon = fixture.root.join("brand.ico");
    fs::write(&icon, b"ico").unwrap();

    let orchestrator =
        BuildOrchestrator::new(ScriptedRunner::new(&[true], 0), CommandBuilder::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut config = fixture.config(BuildMode::SingleDir);
    config.icon = IconPolicy::Custom(icon.clone());
    orchestrator.run(config, &tx).await.unwrap();

    let expected = format!("Icon: custom -> {icon}");
    assert!(lines(&drain(&mut rx)).contains(&expected.as_str()));
    let calls = orchestrator.runner().calls();
    assert!(calls[0].args.contains(&format!("--icon={icon}")));
    assert!(Utf8Path::new(&calls[0].args[2]).is_absolute());
}
