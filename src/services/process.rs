use crate::services::command::Invocation;
use encoding_rs::{Encoding, UTF_8};
use std::ffi::OsString;
use std::future::Future;
use std::io::{self, BufRead, BufReader, PipeReader, PipeWriter};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Variables removed from the child environment.
///
/// `TCL_LIBRARY`/`TK_LIBRARY` can point the bundler at a stale embedded Tk
/// runtime, and `_MEIPASS2` is PyInstaller's own bootstrap marker which makes
/// a frozen child believe it is already unpacked.
pub const STRIPPED_ENV_VARS: &[&str] = &["TCL_LIBRARY", "TK_LIBRARY", "_MEIPASS2"];

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Outcome of one subprocess run. Output is streamed, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl ProcessResult {
    pub fn failed() -> Self {
        Self {
            success: false,
            exit_code: None,
        }
    }
}

/// Runs one bundler invocation and streams its output.
///
/// Implementations never return an error: launch problems are reported as a
/// single diagnostic line followed by a failed [`ProcessResult`].
pub trait ToolRunner: Send + Sync {
    fn run<F>(&self, invocation: &Invocation, on_line: F) -> impl Future<Output = ProcessResult> + Send
    where
        F: FnMut(String) + Send;
}

impl<T: ToolRunner> ToolRunner for Arc<T> {
    fn run<F>(&self, invocation: &Invocation, on_line: F) -> impl Future<Output = ProcessResult> + Send
    where
        F: FnMut(String) + Send,
    {
        (**self).run(invocation, on_line)
    }
}

/// Copy of `vars` without [`STRIPPED_ENV_VARS`].
pub fn filter_environment<I>(vars: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter(|(key, _)| {
            let key = key.to_string_lossy();
            !STRIPPED_ENV_VARS.iter().any(|stripped| {
                if cfg!(windows) {
                    key.eq_ignore_ascii_case(stripped)
                } else {
                    key == *stripped
                }
            })
        })
        .collect()
}

/// Fresh snapshot of the current process environment, minus conflicting variables.
///
/// The parent environment is never modified.
pub fn sanitized_environment() -> Vec<(OsString, OsString)> {
    filter_environment(std::env::vars_os())
}

/// [`ToolRunner`] backed by a real child process.
///
/// stdout and stderr share one pipe, so lines arrive in the order the child
/// wrote them. They are decoded with the configured console encoding;
/// undecodable bytes are replaced.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    output_encoding: &'static Encoding,
}

impl ProcessRunner {
    /// # Arguments
    /// * `output_encoding` - WHATWG encoding label such as `utf-8` or `gbk`; unknown labels fall back to UTF-8
    pub fn new(output_encoding: &str) -> Self {
        let encoding = Encoding::for_label(output_encoding.trim().as_bytes()).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown tool output encoding '{}', falling back to UTF-8",
                output_encoding
            );
            UTF_8
        });
        Self {
            output_encoding: encoding,
        }
    }

    pub fn output_encoding(&self) -> &'static str {
        self.output_encoding.name()
    }

    fn decode_line(&self, bytes: &[u8]) -> String {
        let trimmed = bytes
            .strip_suffix(b"\n")
            .map(|b| b.strip_suffix(b"\r").unwrap_or(b))
            .unwrap_or(bytes);
        let (text, _had_errors) = self.output_encoding.decode_without_bom_handling(trimmed);
        text.into_owned()
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            output_encoding: UTF_8,
        }
    }
}

impl ToolRunner for ProcessRunner {
    async fn run<F>(&self, invocation: &Invocation, mut on_line: F) -> ProcessResult
    where
        F: FnMut(String) + Send,
    {
        tracing::info!("Executing: {}", invocation);
        let start = Instant::now();

        let (reader, stdout_writer, stderr_writer) = match output_pipe() {
            Ok(pipe) => pipe,
            Err(e) => {
                tracing::error!("Failed to create output pipe for {}: {}", invocation.program, e);
                on_line(format!("Error: failed to launch {}: {}", invocation.program, e));
                return ProcessResult::failed();
            }
        };

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .env_clear()
            .envs(sanitized_environment())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let spawned = cmd.spawn();
        // The command still owns the parent's copies of the write end.
        // Until they close the reader never sees EOF.
        drop(cmd);

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to spawn {}: {}", invocation.program, e);
                on_line(format!("Error: failed to launch {}: {}", invocation.program, e));
                return ProcessResult::failed();
            }
        };

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::task::spawn_blocking(move || forward_lines(reader, line_tx));

        while let Some(bytes) = line_rx.recv().await {
            on_line(self.decode_line(&bytes));
        }

        match child.wait().await {
            Ok(status) => {
                tracing::info!(
                    "{} completed in {:.2}s with {}",
                    invocation.program,
                    start.elapsed().as_secs_f32(),
                    status
                );
                ProcessResult {
                    success: status.success(),
                    exit_code: status.code(),
                }
            }
            Err(e) => {
                tracing::error!("Failed to wait for {}: {}", invocation.program, e);
                on_line(format!("Error: {}", e));
                ProcessResult::failed()
            }
        }
    }
}

/// One pipe with two write ends, for the child's stdout and stderr.
fn output_pipe() -> io::Result<(PipeReader, PipeWriter, PipeWriter)> {
    let (reader, writer) = io::pipe()?;
    let second = writer.try_clone()?;
    Ok((reader, writer, second))
}

fn forward_lines(reader: PipeReader, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(std::mem::take(&mut buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_filter_environment_removes_conflicts() {
        let filtered = filter_environment(vars(&[
            ("PATH", "/usr/bin"),
            ("TCL_LIBRARY", "/tmp/_MEI1/tcl"),
            ("TK_LIBRARY", "/tmp/_MEI1/tk"),
            ("_MEIPASS2", "/tmp/_MEI1"),
            ("HOME", "/home/me"),
        ]));

        let keys: Vec<_> = filtered.iter().map(|(k, _)| k.to_string_lossy().into_owned()).collect();
        assert_eq!(keys, vec!["PATH", "HOME"]);
    }

    #[test]
    fn test_decode_line_strips_terminators_and_replaces() {
        let runner = ProcessRunner::default();
        assert_eq!(runner.decode_line(b"INFO: Building\r\n"), "INFO: Building");
        assert_eq!(runner.decode_line(b"no newline"), "no newline");
        assert_eq!(runner.decode_line(b"bad \xff byte\n"), "bad \u{FFFD} byte");
    }

    #[test]
    fn test_gbk_decoding() {
        let runner = ProcessRunner::new("gbk");
        assert_eq!(runner.output_encoding(), "GBK");
        // "打包" in GBK
        assert_eq!(runner.decode_line(&[0xB4, 0xF2, 0xB0, 0xFC, b'\n']), "打包");
    }

    #[test]
    fn test_unknown_encoding_falls_back() {
        let runner = ProcessRunner::new("klingon");
        assert_eq!(runner.output_encoding(), "UTF-8");
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_single_line() {
        let runner = ProcessRunner::default();
        let invocation = Invocation {
            program: "/nonexistent/pypack-test-binary".to_string(),
            args: vec![],
        };

        let mut lines = Vec::new();
        let result = runner.run(&invocation, |line| lines.push(line)).await;

        assert!(!result.success);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interleaved_output_keeps_write_order() {
        let runner = ProcessRunner::default();
        let invocation = Invocation {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "for i in 1 2 3 4 5; do echo out$i; echo err$i 1>&2; done; exit 3".to_string(),
            ],
        };

        let mut lines = Vec::new();
        let result = runner.run(&invocation, |line| lines.push(line)).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        let expected: Vec<String> = (1..=5)
            .flat_map(|i| [format!("out{i}"), format!("err{i}")])
            .collect();
        assert_eq!(lines, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_after_stdout_closes_is_still_read() {
        let runner = ProcessRunner::default();
        let invocation = Invocation {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo first; exec 1>&-; echo last 1>&2".to_string(),
            ],
        };

        let mut lines = Vec::new();
        let result = runner.run(&invocation, |line| lines.push(line)).await;

        assert!(result.success);
        assert_eq!(lines, vec!["first", "last"]);
    }
}
