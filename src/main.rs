//! pypack - PyInstaller build orchestration and Python comment sanitizer
//!
//! Main entry point for the command-line front end.
//!
//! # Overview
//!
//! This binary crate parses the command line and initializes:
//! - Configuration loading ([`ConfigManager`]) from `<config-dir>/pypack.yaml` and `PYPACK_*`
//! - Logging infrastructure (daily rotating file, console on `--debug`)
//! - Tokio async runtime (worker tasks and subprocess I/O)
//! - State management ([`StateManager`]) and [`Metrics`]
//! - The headless [`Controller`], which starts one worker per operation
//!
//! The main thread blocks on the runtime and drains the worker's event channel
//! on the configured poll interval, printing log lines to stdout in order.
//!
//! # Commands
//!
//! - `build <script>`: clean stale artifacts, then run one PyInstaller invocation per step
//! - `clean-artifacts [script]`: remove `build/`, `dist/`, `__pycache__/` and the spec file
//! - `sanitize <files>...`: write a comment-free `<stem>_clean<ext>` next to each file,
//!   optionally forcing a codec (`--encoding`) and revealing the folder afterwards (`--open`)
//!
//! The process exits with failure when a build fails or any sanitize job fails.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use pypack::logging::{LOG_PREFIX, setup_logging_with_console};
use pypack::models::{BuildMode, IconPolicy, ResourceKind, SanitizeOptions};
use pypack::services::{BuildEvent, SanitizeEvent, clean_artifacts};
use pypack::ui::{Controller, EventPump, WorkerEvent, reveal_in_file_manager};
use pypack::{APP_NAME, BuildConfig, ConfigManager, Metrics, SanitizeJob, StateManager, UserConfig, VERSION};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const WORKER_THREADS: usize = 2;

/// Package Python scripts with PyInstaller and strip comments from Python sources
#[derive(Parser, Debug)]
#[command(name = "pypack", version, about, long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        default_value = ".",
        help = "Directory holding pypack.yaml"
    )]
    config_dir: Utf8PathBuf,

    #[arg(long, global = true, help = "Debug logging, mirrored to stderr")]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Build an executable from a Python entry script")]
    Build(BuildArgs),

    #[command(about = "Remove build/, dist/, __pycache__/ and <name>.spec next to a script")]
    CleanArtifacts(CleanArgs),

    #[command(about = "Write comment-free <stem>_clean<ext> copies of Python files")]
    Sanitize(SanitizeArgs),
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    #[arg(value_name = "SCRIPT", help = "Entry script")]
    script: Utf8PathBuf,

    #[arg(short = 'n', long, help = "Output name (defaults to the script's file stem)")]
    name: Option<String>,

    #[arg(short = 'm', long, value_enum, help = "Build mode (defaults to the configured mode)")]
    mode: Option<BuildMode>,

    #[arg(long, conflicts_with = "no_console", help = "Keep the console window of the built executable")]
    console: bool,

    #[arg(long, help = "Hide the console window, even when the settings keep it")]
    no_console: bool,

    #[arg(long, conflicts_with = "no_compress", help = "Allow UPX compression")]
    compress: bool,

    #[arg(long, help = "Disable UPX compression, even when the settings allow it")]
    no_compress: bool,

    #[arg(long, value_name = "PATH", conflicts_with = "no_icon", help = "Custom icon file")]
    icon: Option<Utf8PathBuf>,

    #[arg(long, help = "Do not embed any icon")]
    no_icon: bool,

    #[arg(
        long = "add-data",
        value_name = "PATH",
        help = "Extra file or folder to embed (repeatable)"
    )]
    add_data: Vec<Utf8PathBuf>,

    #[arg(long, value_name = "PROGRAM", help = "Python interpreter running PyInstaller")]
    interpreter: Option<String>,

    #[arg(long, help = "Reveal the dist directory after a successful build")]
    open: bool,
}

#[derive(Args, Debug, Clone)]
struct CleanArgs {
    #[arg(value_name = "SCRIPT", help = "Entry script whose artifacts are removed")]
    script: Option<Utf8PathBuf>,

    #[arg(short = 'n', long, help = "Output name of the spec file (defaults to the script's file stem)")]
    name: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct SanitizeArgs {
    #[arg(value_name = "FILE", required = true, help = "Python source files")]
    files: Vec<Utf8PathBuf>,

    #[arg(long, help = "Keep runs of blank lines")]
    no_collapse: bool,

    #[arg(
        long,
        value_name = "CODEC",
        help = "Read and write every file with this codec instead of its coding declaration"
    )]
    encoding: Option<String>,

    #[arg(long, help = "Reveal the folder of the first file when the batch is done")]
    open: bool,
}

/// Main entry point for the pypack CLI
///
/// # Errors
///
/// This function can fail if:
/// - The config directory cannot be created or `pypack.yaml` is malformed
/// - Logging initialization fails (disk space, permissions)
/// - Tokio runtime creation fails (system resources)
fn main() -> Result<ExitCode> {
    let cli = CliArgs::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let settings = config_manager.load_user_config()?;

    let debug = cli.debug || settings.debug_mode;
    let log_dir = cli.config_dir.join(&settings.log_dir);
    let _log_guard = setup_logging_with_console(&log_dir, LOG_PREFIX, debug, debug)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(WORKER_THREADS)
        .thread_name("pypack-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    tracing::info!("Tokio runtime initialized with {} worker threads", WORKER_THREADS);

    let state_manager = Arc::new(StateManager::new());
    let metrics = Arc::new(Metrics::new());
    let pump = EventPump::new(settings.poll_interval_ms, Arc::clone(&metrics));
    let controller = Controller::new(
        Arc::clone(&state_manager),
        runtime.handle().clone(),
        Arc::clone(&metrics),
        settings,
    );

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Build(args) => run_build(&controller, &pump, args).await,
            Commands::CleanArtifacts(args) => Ok(run_clean(args).await),
            Commands::Sanitize(args) => run_sanitize(&controller, &pump, args).await,
        }
    });

    metrics.log_summary();
    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result
}

fn build_config(args: &BuildArgs, settings: &UserConfig) -> BuildConfig {
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| args.script.file_stem().unwrap_or_default().to_string());
    let interpreter = args
        .interpreter
        .clone()
        .unwrap_or_else(|| settings.interpreter.clone());

    let mut config = BuildConfig::new(interpreter, args.script.clone(), name);
    config.mode = args.mode.unwrap_or(settings.build_mode);
    config.console = flag_or_setting(args.console, args.no_console, settings.console);
    config.compression = flag_or_setting(args.compress, args.no_compress, settings.compression);
    config.icon = match (&args.icon, args.no_icon) {
        (_, true) => IconPolicy::None,
        (Some(path), false) => IconPolicy::Custom(path.clone()),
        (None, false) => IconPolicy::Default,
    };

    for source in &args.add_data {
        let kind = if source.is_dir() {
            ResourceKind::Directory
        } else {
            ResourceKind::File
        };
        if !config.add_resource(source.clone(), kind) {
            tracing::debug!("Ignoring duplicate resource: {}", source);
        }
    }

    config
}

/// An explicit `--x` or `--no-x` wins over the configured value.
fn flag_or_setting(on: bool, off: bool, setting: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => setting,
    }
}

async fn run_build(controller: &Controller, pump: &EventPump, args: BuildArgs) -> Result<ExitCode> {
    let config = build_config(&args, controller.settings());
    let mut rx = controller.start_build(config)?;

    let finished = pump
        .run(&mut rx, |event| {
            if let Some(line) = event.log_line() {
                println!("{line}");
            }
        })
        .await;

    match finished {
        Some(BuildEvent::Finished {
            success: true,
            dist_dir,
        }) => {
            if let (true, Some(dir)) = (args.open, dist_dir) {
                if let Some(warning) = reveal_in_file_manager(&dir).await {
                    println!("{warning}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

async fn run_clean(args: CleanArgs) -> ExitCode {
    let Some(script) = args.script else {
        println!("No script given, nothing to clean.");
        return ExitCode::SUCCESS;
    };

    let name = args
        .name
        .unwrap_or_else(|| script.file_stem().unwrap_or_default().to_string());
    let script_dir = folder_of(&script);

    let report = clean_artifacts(script_dir, &name).await;
    for path in &report.removed {
        println!("Removed {path}");
    }
    for (path, reason) in &report.failed {
        println!("Warning: could not remove {path}: {reason}");
    }
    if report.removed.is_empty() && report.failed.is_empty() {
        println!("Nothing to clean in {script_dir}");
    }

    ExitCode::SUCCESS
}

async fn run_sanitize(
    controller: &Controller,
    pump: &EventPump,
    args: SanitizeArgs,
) -> Result<ExitCode> {
    let options = SanitizeOptions {
        collapse_blank_lines: controller.settings().collapse_blank_lines && !args.no_collapse,
    };
    let reveal_dir = args
        .files
        .first()
        .filter(|_| args.open)
        .map(|first| folder_of(first).to_owned());
    let jobs = sanitize_jobs(args.files, options, args.encoding);

    let mut rx = controller.start_sanitize(jobs)?;
    let finished = pump
        .run(&mut rx, |event| {
            if let Some(line) = event.log_line() {
                println!("{line}");
            }
        })
        .await;

    if let Some(dir) = reveal_dir {
        if let Some(warning) = reveal_in_file_manager(&dir).await {
            println!("{warning}");
        }
    }

    match finished {
        Some(SanitizeEvent::Finished(summary)) if summary.all_succeeded() => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    }
}

fn sanitize_jobs(
    files: Vec<Utf8PathBuf>,
    options: SanitizeOptions,
    encoding: Option<String>,
) -> Vec<SanitizeJob> {
    files
        .into_iter()
        .map(|source| {
            let job = SanitizeJob::new(source, options);
            match &encoding {
                Some(codec) => job.with_encoding(codec.clone()),
                None => job,
            }
        })
        .collect()
}

/// Directory holding `path`; `.` for a bare file name.
fn folder_of(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    }
}
