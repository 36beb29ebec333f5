//! Comment removal for Python source files.
//!
//! The pipeline for one file is
//! `detect_encoding → decode → tokenize → strip_comments → collapse_blank_lines → encode`,
//! and the result is written next to the source as `<stem>_clean<ext>`.
//! The source file is only ever read.

pub mod blank_lines;
pub mod encoding;
pub mod stripper;
pub mod tokenizer;

pub use blank_lines::collapse_blank_lines;
pub use encoding::{DecodeError, SourceEncoding, detect_encoding, forced_encoding};
pub use stripper::{Stripped, strip_comments};
pub use tokenizer::{LexError, Position, Token, TokenKind, tokenize};

use crate::models::{SanitizeJob, SanitizeOptions};
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: Utf8PathBuf,
        source: DecodeError,
    },

    #[error("cannot tokenize {path}: {source}")]
    Lex { path: Utf8PathBuf, source: LexError },

    #[error("cannot write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("output path {0} would overwrite the source file")]
    OutputIsInput(Utf8PathBuf),
}

/// Result of a text-level sanitize pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    pub comments_removed: usize,
    pub blank_lines_removed: usize,
}

/// Per-file result of a successful sanitize job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOutcome {
    pub source: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub encoding: String,
    pub comments_removed: usize,
    pub blank_lines_removed: usize,
}

/// Counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Done! {}/{} succeeded.", self.succeeded, self.total)
    }
}

/// Messages sent from the sanitize worker to the front end, in emission order.
#[derive(Debug, Clone)]
pub enum SanitizeEvent {
    Line(String),
    FileFinished {
        index: usize,
        total: usize,
        source: Utf8PathBuf,
        outcome: Result<SanitizeOutcome, String>,
    },
    Finished(BatchSummary),
}

/// Strip comments from already decoded source text.
pub fn sanitize_text(source: &str, options: &SanitizeOptions) -> Result<SanitizedText, LexError> {
    let tokens = tokenize(source)?;
    let stripped = strip_comments(&tokens);

    let (text, blank_lines_removed) = if options.collapse_blank_lines {
        collapse_blank_lines(&stripped.text, &stripped.string_lines)
    } else {
        (stripped.text, 0)
    };

    Ok(SanitizedText {
        text,
        comments_removed: stripped.comments_removed,
        blank_lines_removed,
    })
}

/// Sanitize one file into its `_clean` sibling.
///
/// # Errors
/// Any read, decode, lex or write failure for this file. Nothing is written
/// unless the whole source was decoded and tokenized.
pub async fn sanitize_file(job: &SanitizeJob) -> Result<SanitizeOutcome, SanitizeError> {
    let output = job.output_path();
    if output == job.source {
        return Err(SanitizeError::OutputIsInput(output));
    }

    let bytes = tokio::fs::read(&job.source)
        .await
        .map_err(|source| SanitizeError::Read {
            path: job.source.clone(),
            source,
        })?;

    let decode_error = |source| SanitizeError::Decode {
        path: job.source.clone(),
        source,
    };
    let encoding = match &job.encoding {
        Some(name) => forced_encoding(&bytes, name),
        None => detect_encoding(&bytes),
    }
    .map_err(decode_error)?;
    let text = encoding.decode(&bytes).map_err(decode_error)?;

    let sanitized = sanitize_text(&text, &job.options).map_err(|source| SanitizeError::Lex {
        path: job.source.clone(),
        source,
    })?;

    let encoded = encoding.encode(&sanitized.text).map_err(decode_error)?;
    tokio::fs::write(&output, encoded)
        .await
        .map_err(|source| SanitizeError::Write {
            path: output.clone(),
            source,
        })?;

    tracing::debug!(
        "Sanitized {} -> {} ({}, {} comments, {} blank lines)",
        job.source,
        output,
        encoding.name(),
        sanitized.comments_removed,
        sanitized.blank_lines_removed
    );

    Ok(SanitizeOutcome {
        source: job.source.clone(),
        output,
        encoding: encoding.name().to_string(),
        comments_removed: sanitized.comments_removed,
        blank_lines_removed: sanitized.blank_lines_removed,
    })
}

/// Sanitize every job in order. A failing file never stops the batch.
pub async fn run_batch(jobs: Vec<SanitizeJob>, events: &UnboundedSender<SanitizeEvent>) -> BatchSummary {
    let total = jobs.len();
    let mut summary = BatchSummary {
        total,
        ..Default::default()
    };

    tracing::info!("Sanitizing {} file(s)", total);

    for (i, job) in jobs.iter().enumerate() {
        let index = i + 1;
        let result = sanitize_file(job).await;

        let line = match &result {
            Ok(outcome) => {
                summary.succeeded += 1;
                format!(
                    "[{}/{}] {} ... ok ({} comments removed) -> {}",
                    index, total, job.source, outcome.comments_removed, outcome.output
                )
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!("Sanitize failed for {}: {}", job.source, e);
                format!("[{}/{}] {} ... failed: {}", index, total, job.source, e)
            }
        };

        let _ = events.send(SanitizeEvent::Line(line));
        let _ = events.send(SanitizeEvent::FileFinished {
            index,
            total,
            source: job.source.clone(),
            outcome: result.map_err(|e| e.to_string()),
        });
    }

    tracing::info!("{}", summary);
    let _ = events.send(SanitizeEvent::Line(summary.to_string()));
    let _ = events.send(SanitizeEvent::Finished(summary));
    summary
}
