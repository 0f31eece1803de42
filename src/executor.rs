//! Child-process execution: duplicates the child's streams into the caller's
//! stdout/stderr (line-prefixed per task) and captured buffers, traces the
//! command line, and enforces the terminate-then-kill timeout.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::types::{CommandResult, Timeout};

/// Which caller stream a task's live output lines are forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Forwards chunks of child output, each line prefixed with
/// `HH:MM:SSUTC | <task-name> | `.
#[derive(Debug, Clone)]
pub struct TaskWriter {
    name: String,
    stream: Stream,
}

impl TaskWriter {
    pub fn new(name: &str, stream: Stream) -> Self {
        Self {
            name: name.to_string(),
            stream,
        }
    }

    fn write_chunk(&self, chunk: &str) {
        let timestamp = format!("{}UTC", Utc::now().format("%H:%M:%S"));
        let text = prefix_chunk(&self.name, &timestamp, chunk);
        match self.stream {
            Stream::Stdout => {
                let _ = std::io::stdout().write_all(text.as_bytes());
            }
            Stream::Stderr => {
                let _ = std::io::stderr().write_all(text.as_bytes());
            }
        }
    }
}

/// Prefix every line of `chunk` and terminate with a newline.
fn prefix_chunk(name: &str, timestamp: &str, chunk: &str) -> String {
    let prefix = format!("{timestamp} | {name} | ");
    let body = chunk.strip_suffix('\n').unwrap_or(chunk);
    let mut out = String::with_capacity(chunk.len() + prefix.len());
    for (i, line) in body.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&prefix);
        out.push_str(line);
    }
    out.push('\n');
    out
}

/// Everything needed to run one rendered command.
#[derive(Debug, Clone)]
pub struct ExecParams {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Appended to the inherited process environment.
    pub envs: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Timeout,
    pub task_name: String,
    pub quiet: bool,
}

/// A failed execution still carries everything captured up to the failure.
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ExecFailure {
    pub reason: String,
    pub result: CommandResult,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        params: ExecParams,
    ) -> Result<CommandResult, ExecFailure> {
        let rendered = if params.args.is_empty() {
            params.program.clone()
        } else {
            format!("{} {}", params.program, params.args.join(" "))
        };
        let mut result = CommandResult {
            cmd: rendered.clone(),
            ..Default::default()
        };

        let stdout_writer = TaskWriter::new(&params.task_name, Stream::Stdout);
        let stderr_writer = TaskWriter::new(&params.task_name, Stream::Stderr);

        if !params.quiet {
            let trace = format!("+ {rendered}\n");
            stderr_writer.write_chunk(&trace);
            result.stderr.push_str(&trace);
            result.combined_output.push_str(&trace);
        }

        let mut cmd = Command::new(&params.program);
        cmd.args(&params.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if params.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &params.envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| ExecFailure {
            reason: format!("spawning {}: {e}", params.program),
            result: result.clone(),
        })?;

        if let Some(text) = &params.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let bytes = text.clone().into_bytes();
                // Feed stdin concurrently so a large payload cannot deadlock
                // against unread output.
                tokio::spawn(async move {
                    let _ = stdin.write_all(&bytes).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let mut stdout = child.stdout.take().unwrap();
        let mut stderr = child.stderr.take().unwrap();
        let mut stdout_buf = vec![0u8; 4096];
        let mut stderr_buf = vec![0u8; 4096];
        let mut stdout_done = false;
        let mut stderr_done = false;

        let has_deadline = !params.timeout.duration.is_zero();
        let term_deadline = Instant::now()
            + if has_deadline {
                params.timeout.duration
            } else {
                Duration::from_secs(u32::MAX as u64)
            };
        let kill_deadline = term_deadline + params.timeout.kill_after;
        let escalates = !params.timeout.kill_after.is_zero();
        let mut term_sent = false;
        let mut timed_out = false;
        let mut cancelled = false;

        let exit_code = loop {
            tokio::select! {
                biased;

                status = child.wait() => {
                    let mut rest = Vec::new();
                    let _ = stdout.read_to_end(&mut rest).await;
                    push_output(&mut result, &stdout_writer, Stream::Stdout, &rest);
                    let mut rest = Vec::new();
                    let _ = stderr.read_to_end(&mut rest).await;
                    push_output(&mut result, &stderr_writer, Stream::Stderr, &rest);
                    break match status {
                        Ok(s) => s.code().unwrap_or(-1),
                        Err(_) => -1,
                    };
                }

                n = stdout.read(&mut stdout_buf), if !stdout_done => {
                    match n {
                        Ok(0) | Err(_) => stdout_done = true,
                        Ok(n) => push_output(&mut result, &stdout_writer, Stream::Stdout, &stdout_buf[..n]),
                    }
                }

                n = stderr.read(&mut stderr_buf), if !stderr_done => {
                    match n {
                        Ok(0) | Err(_) => stderr_done = true,
                        Ok(n) => push_output(&mut result, &stderr_writer, Stream::Stderr, &stderr_buf[..n]),
                    }
                }

                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    let _ = child.start_kill();
                }

                _ = sleep_until(term_deadline), if has_deadline && !term_sent && !cancelled => {
                    term_sent = true;
                    timed_out = true;
                    terminate(&child);
                    if !escalates {
                        let _ = child.start_kill();
                    }
                }

                _ = sleep_until(kill_deadline), if term_sent && escalates => {
                    let _ = child.start_kill();
                }
            }
        };

        result.exit_code = exit_code;

        if cancelled {
            return Err(ExecFailure {
                reason: "command cancelled".to_string(),
                result,
            });
        }
        if timed_out {
            return Err(ExecFailure {
                reason: format!("command timed out after {:?}", params.timeout.duration),
                result,
            });
        }
        if exit_code != 0 {
            return Err(ExecFailure {
                reason: format!("command failed with exit code {exit_code}"),
                result,
            });
        }
        Ok(result)
    }
}

fn push_output(result: &mut CommandResult, writer: &TaskWriter, stream: Stream, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(bytes);
    writer.write_chunk(&text);
    match stream {
        Stream::Stdout => result.stdout.push_str(&text),
        Stream::Stderr => result.stderr.push_str(&text),
    }
    result.combined_output.push_str(&text);
}

/// Ask the child to terminate (SIGTERM via the `kill` binary); the caller
/// escalates to `start_kill` after the grace window.
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("kill")
            .arg(pid.to_string())
            .output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(command: &str) -> ExecParams {
        ExecParams {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), command.to_string()],
            working_dir: None,
            envs: vec![],
            stdin: None,
            timeout: Timeout::default(),
            task_name: "test".to_string(),
            quiet: true,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let cancel = CancellationToken::new();
        let result = Executor.run(&cancel, sh("printf hello")).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.combined_output, "hello");
    }

    #[tokio::test]
    async fn test_captures_stderr_and_combined() {
        let cancel = CancellationToken::new();
        let result = Executor
            .run(&cancel, sh("printf out; printf err >&2"))
            .await
            .unwrap();
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert!(result.combined_output.contains("out"));
        assert!(result.combined_output.contains("err"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_failure_with_captured_output() {
        let cancel = CancellationToken::new();
        let failure = Executor
            .run(&cancel, sh("printf partial; exit 3"))
            .await
            .unwrap_err();
        assert!(failure.reason.contains("exit code 3"));
        assert_eq!(failure.result.exit_code, 3);
        assert_eq!(failure.result.stdout, "partial");
    }

    #[tokio::test]
    async fn test_env_vars_reach_the_child() {
        let cancel = CancellationToken::new();
        let mut params = sh("printf \"$GREETING\"");
        params.envs = vec![("GREETING".to_string(), "hi".to_string())];
        let result = Executor.run(&cancel, params).await.unwrap();
        assert_eq!(result.stdout, "hi");
    }

    #[tokio::test]
    async fn test_stdin_is_fed_to_the_child() {
        let cancel = CancellationToken::new();
        let mut params = sh("cat");
        params.stdin = Some("over stdin".to_string());
        let result = Executor.run(&cancel, params).await.unwrap();
        assert_eq!(result.stdout, "over stdin");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let cancel = CancellationToken::new();
        let mut params = sh("sleep 5");
        params.timeout = Timeout {
            duration: Duration::from_millis(200),
            kill_after: Duration::ZERO,
        };
        let started = std::time::Instant::now();
        let failure = Executor.run(&cancel, params).await.unwrap_err();
        assert!(failure.reason.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_child() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let failure = Executor.run(&cancel, sh("sleep 5")).await.unwrap_err();
        assert!(failure.reason.contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_prefix_chunk_prefixes_every_line() {
        let out = prefix_chunk("build", "12:30:00UTC", "one\ntwo\n");
        assert_eq!(
            out,
            "12:30:00UTC | build | one\n12:30:00UTC | build | two\n"
        );
    }

    #[test]
    fn test_prefix_chunk_without_trailing_newline() {
        let out = prefix_chunk("build", "12:30:00UTC", "solo");
        assert_eq!(out, "12:30:00UTC | build | solo\n");
    }
}
