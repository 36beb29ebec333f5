use crate::models::{BuildConfig, BuildStep, ConfigError};
use crate::services::command::{CommandBuilder, FsProbe, IconChoice, PathProbe};
use crate::services::process::ToolRunner;
use camino::{Utf8Path, Utf8PathBuf};
use std::io::ErrorKind;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Progress added for every line of bundler output.
pub const PROGRESS_PER_LINE: f32 = 0.1;

/// Progress never passes this value until every step has succeeded.
pub const PROGRESS_CAP: f32 = 95.0;

/// Directories next to the script removed before each build.
pub const STALE_ARTIFACT_DIRS: &[&str] = &["build", "dist", "__pycache__"];

/// Where a build run currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildPhase {
    Idle,
    Cleaning,
    Running {
        index: usize,
        total: usize,
        step: BuildStep,
    },
    Failed,
    Succeeded,
}

/// Messages sent from the build worker to the front end, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Line(String),
    Progress(f32),
    Phase(BuildPhase),
    Finished {
        success: bool,
        dist_dir: Option<Utf8PathBuf>,
    },
}

/// Errors that end a build run.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid build configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Step {index} ({step}) failed{}", .exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    StepFailed {
        index: usize,
        step: BuildStep,
        exit_code: Option<i32>,
    },
}

/// Line-count based liveness indicator.
///
/// Monotonic, capped at [`PROGRESS_CAP`] until [`complete`](Self::complete)
/// is called, and reaches exactly 100 only then.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressMeter {
    value: f32,
}

impl ProgressMeter {
    /// Account for one output line. Returns the new value if it moved.
    pub fn tick(&mut self) -> Option<f32> {
        if self.value >= PROGRESS_CAP {
            return None;
        }
        self.value = (self.value + PROGRESS_PER_LINE).min(PROGRESS_CAP);
        Some(self.value)
    }

    pub fn complete(&mut self) -> f32 {
        self.value = 100.0;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

/// What the pre-build cleanup did.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<Utf8PathBuf>,
    pub failed: Vec<(Utf8PathBuf, String)>,
}

/// Remove stale `build/`, `dist/`, `__pycache__/` and `<output_name>.spec`.
///
/// Best effort: missing entries are ignored and removal failures are only
/// recorded in the report.
pub async fn clean_artifacts(script_dir: &Utf8Path, output_name: &str) -> CleanupReport {
    let mut report = CleanupReport::default();

    for dir in STALE_ARTIFACT_DIRS {
        let path = script_dir.join(dir);
        record_removal(&mut report, path.clone(), tokio::fs::remove_dir_all(&path).await);
    }

    let name = output_name.trim();
    if !name.is_empty() {
        let spec = script_dir.join(format!("{name}.spec"));
        record_removal(&mut report, spec.clone(), tokio::fs::remove_file(&spec).await);
    }

    report
}

fn record_removal(report: &mut CleanupReport, path: Utf8PathBuf, result: std::io::Result<()>) {
    match result {
        Ok(()) => {
            tracing::debug!("Removed stale artifact: {}", path);
            report.removed.push(path);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!("Could not remove {}: {}", path, e);
            report.failed.push((path, e.to_string()));
        }
    }
}

/// Drives the bundler through every step of a [`BuildConfig`].
///
/// `Idle → Cleaning → Running[i] → (Running[i+1] | Failed | Succeeded)`.
/// The first failing step ends the run; later steps are never started.
pub struct BuildOrchestrator<R, P = FsProbe> {
    runner: R,
    builder: CommandBuilder,
    probe: P,
}

impl<R: ToolRunner> BuildOrchestrator<R> {
    pub fn new(runner: R, builder: CommandBuilder) -> Self {
        Self {
            runner,
            builder,
            probe: FsProbe,
        }
    }
}

impl<R: ToolRunner, P: PathProbe + Sync> BuildOrchestrator<R, P> {
    pub fn with_probe(runner: R, builder: CommandBuilder, probe: P) -> Self {
        Self {
            runner,
            builder,
            probe,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run every step of `config` in order.
    ///
    /// # Returns
    /// The dist directory when every step succeeded.
    ///
    /// # Errors
    /// [`BuildError::Config`] before anything runs, or [`BuildError::StepFailed`]
    /// for the first step whose process failed.
    pub async fn run(
        &self,
        config: BuildConfig,
        events: &UnboundedSender<BuildEvent>,
    ) -> Result<Utf8PathBuf, BuildError> {
        let emit = |event: BuildEvent| {
            // The front end may have gone away; the build still finishes.
            let _ = events.send(event);
        };
        let line = |text: String| emit(BuildEvent::Line(text));

        let config = config.validate()?;
        tracing::info!(
            "Starting build of {} ({:?}, {} resources)",
            config.script,
            config.mode,
            config.resource_count()
        );

        emit(BuildEvent::Phase(BuildPhase::Cleaning));
        line(">>> Cleaning previous build artifacts...".to_string());
        let report = clean_artifacts(config.script_dir(), &config.output_name).await;
        for (path, reason) in &report.failed {
            line(format!("Warning: could not remove {}: {}", path, reason));
        }

        let steps = config.mode.steps();
        let total = steps.len();
        let mut progress = ProgressMeter::default();

        for (i, &step) in steps.iter().enumerate() {
            let index = i + 1;
            emit(BuildEvent::Phase(BuildPhase::Running { index, total, step }));
            line(format!(">>> Step {}/{}: {} ...", index, total, step));

            match self.builder.resolve_icon(&config.icon, &self.probe) {
                IconChoice::Custom(path) => line(format!("Icon: custom -> {}", path)),
                IconChoice::Default(path) => line(format!("Icon: built-in default -> {}", path)),
                IconChoice::None => line("Icon: none".to_string()),
            }

            let invocation = self.builder.invocation(&config, step, &self.probe);
            line(format!("Cmd: {}", invocation));

            let result = self
                .runner
                .run(&invocation, |output| {
                    let _ = events.send(BuildEvent::Line(output));
                    if let Some(value) = progress.tick() {
                        let _ = events.send(BuildEvent::Progress(value));
                    }
                })
                .await;

            if !result.success {
                tracing::error!("Build step {}/{} ({}) failed", index, total, step);
                line("✗ Build failed, remaining steps skipped.".to_string());
                emit(BuildEvent::Phase(BuildPhase::Failed));
                return Err(BuildError::StepFailed {
                    index,
                    step,
                    exit_code: result.exit_code,
                });
            }
        }

        let dist_dir = config.dist_dir();
        emit(BuildEvent::Progress(progress.complete()));
        emit(BuildEvent::Phase(BuildPhase::Succeeded));
        line(format!("✓ Build finished! Output: {}", dist_dir));
        tracing::info!("Build finished, artifacts in {}", dist_dir);

        Ok(dist_dir)
    }
}
