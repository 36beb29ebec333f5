//! Services module - The build pipeline and the comment sanitizer.
//!
//! Services know nothing about the front end. They receive request values
//! ([`BuildConfig`](crate::models::BuildConfig), [`SanitizeJob`](crate::models::SanitizeJob))
//! and report back through an unbounded channel of ordered events.
//!
//! # Components
//!
//! - [`CommandBuilder`]: pure mapping of a build request plus one [`BuildStep`](crate::models::BuildStep)
//!   to the bundler's argument vector. Filesystem checks go through [`PathProbe`].
//! - [`ProcessRunner`]: runs one invocation with a sanitized environment and streams
//!   merged stdout/stderr line by line ([`ToolRunner`] is the seam for tests).
//! - [`BuildOrchestrator`]: cleanup, step expansion, one run per step, stop at the
//!   first failure, progress approximation.
//! - [`sanitizer`]: encoding detection, tokenizer, comment stripper and blank-line
//!   collapser, plus the per-file and batch drivers.
//!
//! # Usage Example
//!
//! ```ignore
//! use pypack::models::BuildConfig;
//! use pypack::services::{BuildOrchestrator, CommandBuilder, ProcessRunner};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let orchestrator = BuildOrchestrator::new(ProcessRunner::default(), CommandBuilder::new(None));
//! let dist = orchestrator.run(BuildConfig::new("python", "app.py", "app"), &tx).await?;
//! ```

pub mod build;
pub mod command;
pub mod process;
pub mod sanitizer;

pub use build::{
    BuildError, BuildEvent, BuildOrchestrator, BuildPhase, CleanupReport, ProgressMeter,
    clean_artifacts,
};
pub use command::{CommandBuilder, FsProbe, IconChoice, Invocation, PathKind, PathProbe};
pub use process::{ProcessResult, ProcessRunner, ToolRunner, sanitized_environment};
pub use sanitizer::{
    BatchSummary, SanitizeError, SanitizeEvent, SanitizeOutcome, SanitizedText, run_batch,
    sanitize_file, sanitize_text,
};
