// Controller - Starts workers and mirrors their events into shared state
//
// Every operation gets exactly one background task on the tokio runtime. The
// task relays the worker's events to the front end unchanged, in order, and
// updates the StateManager and Metrics along the way. The front end only ever
// reads the returned channel.

use crate::metrics::Metrics;
use crate::models::{BuildConfig, SanitizeJob, UserConfig};
use crate::services::command::Invocation;
use crate::services::{
    BuildError, BuildEvent, BuildOrchestrator, BuildPhase, CommandBuilder, ProcessResult,
    ProcessRunner, SanitizeEvent, ToolRunner, run_batch,
};
use crate::state::{OperationInProgress, StateManager};
use camino::Utf8Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Headless application controller.
///
/// Generic over the [`ToolRunner`] so tests can drive builds without a real
/// bundler.
pub struct Controller<R = ProcessRunner> {
    /// Shared state manager
    state_manager: Arc<StateManager>,

    /// Runtime the worker tasks are spawned on
    tokio_handle: Handle,

    metrics: Arc<Metrics>,
    settings: UserConfig,
    runner: Arc<R>,
}

impl Controller<ProcessRunner> {
    /// Create a controller that launches the real bundler.
    ///
    /// # Arguments
    /// * `state_manager` - Shared application state manager
    /// * `tokio_handle` - Handle to the tokio runtime for spawning worker tasks
    /// * `metrics` - Process-wide counters
    /// * `settings` - Loaded user configuration
    pub fn new(
        state_manager: Arc<StateManager>,
        tokio_handle: Handle,
        metrics: Arc<Metrics>,
        settings: UserConfig,
    ) -> Self {
        let runner = ProcessRunner::new(&settings.tool_output_encoding);
        Self::with_runner(state_manager, tokio_handle, metrics, settings, runner)
    }
}

impl<R: ToolRunner + 'static> Controller<R> {
    pub fn with_runner(
        state_manager: Arc<StateManager>,
        tokio_handle: Handle,
        metrics: Arc<Metrics>,
        settings: UserConfig,
        runner: R,
    ) -> Self {
        tracing::info!("Controller initialized");
        Self {
            state_manager,
            tokio_handle,
            metrics,
            settings,
            runner: Arc::new(runner),
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &UserConfig {
        &self.settings
    }

    /// Start a build in the background.
    ///
    /// The returned channel carries every [`BuildEvent`] in emission order and
    /// always ends with [`BuildEvent::Finished`].
    ///
    /// # Errors
    /// [`OperationInProgress`] if a build is already running. Nothing is spawned.
    pub fn start_build(
        &self,
        config: BuildConfig,
    ) -> Result<UnboundedReceiver<BuildEvent>, OperationInProgress> {
        self.state_manager
            .try_start_build(config.mode.steps().len())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::clone(&self.state_manager);
        let metrics = Arc::clone(&self.metrics);
        let builder = CommandBuilder::new(self.settings.default_icon_path());
        let runner = CountingRunner {
            inner: Arc::clone(&self.runner),
            metrics: Arc::clone(&self.metrics),
        };
        let orchestrator = BuildOrchestrator::new(runner, builder);

        self.tokio_handle.spawn(async move {
            Self::run_build_workflow(orchestrator, config, state, metrics, tx).await;
        });

        Ok(rx)
    }

    async fn run_build_workflow(
        orchestrator: BuildOrchestrator<CountingRunner<R>>,
        config: BuildConfig,
        state: Arc<StateManager>,
        metrics: Arc<Metrics>,
        tx: UnboundedSender<BuildEvent>,
    ) {
        let start = Instant::now();
        let total_steps = config.mode.steps().len();
        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel();

        let build = async move { orchestrator.run(config, &inner_tx).await };
        let relay = async {
            while let Some(event) = inner_rx.recv().await {
                match &event {
                    BuildEvent::Progress(percent) => {
                        state.set_build_progress(*percent);
                    }
                    BuildEvent::Phase(BuildPhase::Running { index, total, step }) => {
                        state.start_build_step(*index, *total, *step);
                    }
                    _ => {}
                }
                let _ = tx.send(event);
            }
        };

        let (result, ()) = tokio::join!(build, relay);

        let (success, dist_dir) = match result {
            Ok(dist_dir) => {
                (0..total_steps).for_each(|_| metrics.record_step(true));
                (true, Some(dist_dir))
            }
            Err(BuildError::StepFailed { index, .. }) => {
                (1..index).for_each(|_| metrics.record_step(true));
                metrics.record_step(false);
                (false, None)
            }
            Err(e @ BuildError::Config(_)) => {
                tracing::error!("Build not started: {}", e);
                let _ = tx.send(BuildEvent::Line(format!("✗ {}", e)));
                (false, None)
            }
        };

        metrics.record_build_time(start.elapsed());
        state.finish_build(success, dist_dir.clone());
        let _ = tx.send(BuildEvent::Finished { success, dist_dir });
    }

    /// Start a sanitize batch in the background.
    ///
    /// The returned channel carries every [`SanitizeEvent`] in emission order
    /// and always ends with [`SanitizeEvent::Finished`].
    ///
    /// # Errors
    /// [`OperationInProgress`] if a batch is already running. Nothing is spawned.
    pub fn start_sanitize(
        &self,
        jobs: Vec<SanitizeJob>,
    ) -> Result<UnboundedReceiver<SanitizeEvent>, OperationInProgress> {
        self.state_manager.try_start_sanitize(jobs.len())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::clone(&self.state_manager);
        let metrics = Arc::clone(&self.metrics);

        self.tokio_handle.spawn(async move {
            Self::run_sanitize_workflow(jobs, state, metrics, tx).await;
        });

        Ok(rx)
    }

    async fn run_sanitize_workflow(
        jobs: Vec<SanitizeJob>,
        state: Arc<StateManager>,
        metrics: Arc<Metrics>,
        tx: UnboundedSender<SanitizeEvent>,
    ) {
        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel();

        let batch = async move { run_batch(jobs, &inner_tx).await };
        let relay = async {
            while let Some(event) = inner_rx.recv().await {
                match &event {
                    SanitizeEvent::FileFinished {
                        source, outcome, ..
                    } => {
                        let success = outcome.is_ok();
                        let (comments, blanks) = outcome
                            .as_ref()
                            .map(|o| (o.comments_removed, o.blank_lines_removed))
                            .unwrap_or((0, 0));
                        state.add_file_result(source.clone(), success, comments, blanks);
                        metrics.record_file(success);
                    }
                    SanitizeEvent::Finished(_) => {
                        state.finish_sanitize();
                    }
                    SanitizeEvent::Line(_) => {}
                }
                let _ = tx.send(event);
            }
        };

        let (summary, ()) = tokio::join!(batch, relay);
        tracing::info!(
            "Sanitize batch complete: {}/{} succeeded",
            summary.succeeded,
            summary.total
        );
    }
}

/// Counts the bundler's own output lines before they reach the orchestrator.
struct CountingRunner<R> {
    inner: Arc<R>,
    metrics: Arc<Metrics>,
}

impl<R: ToolRunner> ToolRunner for CountingRunner<R> {
    async fn run<F>(&self, invocation: &Invocation, mut on_line: F) -> ProcessResult
    where
        F: FnMut(String) + Send,
    {
        let metrics = &self.metrics;
        self.inner
            .run(invocation, |line| {
                metrics.record_line();
                on_line(line);
            })
            .await
    }
}

/// Show `dir` in the platform file manager.
///
/// # Returns
/// A warning line when the file manager could not be launched. Its exit status
/// is ignored (`explorer` reports 1 even on success).
pub async fn reveal_in_file_manager(dir: &Utf8Path) -> Option<String> {
    let program = if cfg!(windows) {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };

    tracing::debug!("Revealing {} with {}", dir, program);
    match Command::new(program).arg(dir.as_str()).status().await {
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Could not launch {}: {}", program, e);
            Some(format!("Could not open {} in the file manager: {}", dir, e))
        }
    }
}
