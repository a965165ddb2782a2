//! Child-process runner for the external media toolchain.
//!
//! Spawns a tool with stdin detached and a fixed environment, captures its
//! streams (or appends them to a caller-supplied sink file), and enforces a
//! deadline. On timeout the child is killed and reaped so no zombie
//! survives.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time;

/// Deadline applied to probe invocations.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(300);

/// Deadline applied to each crop-detection sample.
pub const CROP_SAMPLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for child-process execution.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The argv vector was empty.
    #[error("Empty command line")]
    EmptyCommandLine,

    /// The child could not be spawned at all.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The child exited with a non-zero status.
    #[error("{program} exited with status {code}: {detail}")]
    ProcessFailed {
        program: String,
        code: i32,
        detail: String,
    },

    /// The child was killed by a signal.
    #[error("{program} was terminated by a signal")]
    Terminated { program: String },

    /// The deadline elapsed before the child exited.
    #[error("{program} timed out after {timeout_secs} s")]
    Timeout { program: String, timeout_secs: u64 },

    /// IO error while driving the child.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a successful child run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Base command: stdin detached, no shell, current environment plus
/// `TERM=dumb` and a glibc arena cap to limit allocator fragmentation in
/// long-running encoder children.
fn base_command(argv: &[String]) -> Result<(String, Command), ProcessError> {
    let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommandLine)?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.env("TERM", "dumb");
    cmd.env("MALLOC_ARENA_MAX", "2");
    cmd.kill_on_drop(true);
    Ok((program.clone(), cmd))
}

/// Run a tool to completion, capturing both streams.
///
/// Returns `ProcessFailed` on non-zero exit (with trimmed stderr in the
/// message) and `Timeout` when the deadline elapses; pass `None` for
/// passes that must run unbounded.
pub async fn run(
    argv: &[String],
    timeout: Option<Duration>,
) -> Result<CommandOutput, ProcessError> {
    let (program, mut cmd) = base_command(argv)?;
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    // Both pipes drain concurrently with the wait; draining one after the
    // other can deadlock against a child blocked on a full pipe.
    let wait = async {
        let drain_out = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let drain_err = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out, err, status) = tokio::join!(drain_out, drain_err, child.wait());
        out?;
        err?;
        status
    };

    let status = match timeout {
        Some(limit) => match time::timeout(limit, wait).await {
            Ok(status) => status?,
            Err(_) => {
                // Terminate, then await the exit so the child is reaped.
                let _ = child.kill().await;
                return Err(ProcessError::Timeout {
                    program,
                    timeout_secs: limit.as_secs(),
                });
            }
        },
        None => wait.await?,
    };

    exit_status_to_result(&program, status, stdout, stderr)
}

/// Run a tool with both streams appended to a sink file.
///
/// Used by the encoder driver so pass output accumulates in the job's
/// token log. No deadline: encoding passes run unbounded.
pub async fn run_with_sink(argv: &[String], sink: &Path) -> Result<(), ProcessError> {
    let (program, mut cmd) = base_command(argv)?;

    let out_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(sink)?;
    let err_file = out_file.try_clone()?;
    cmd.stdout(Stdio::from(out_file));
    cmd.stderr(Stdio::from(err_file));

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    let status = child.wait().await?;

    exit_status_to_result(&program, status, Vec::new(), Vec::new()).map(|_| ())
}

fn exit_status_to_result(
    program: &str,
    status: std::process::ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
) -> Result<CommandOutput, ProcessError> {
    if status.success() {
        return Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr,
        });
    }
    match status.code() {
        Some(code) => {
            let detail = if stderr.is_empty() {
                "output captured in job log".to_string()
            } else {
                String::from_utf8_lossy(&stderr).trim().to_string()
            };
            Err(ProcessError::ProcessFailed {
                program: program.to_string(),
                code,
                detail,
            })
        }
        None => Err(ProcessError::Terminated {
            program: program.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = run(&argv(&["sh", "-c", "echo hello"]), None).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout_str().trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_captures_stderr_on_failure() {
        let err = run(&argv(&["sh", "-c", "echo broken >&2; exit 3"]), None)
            .await
            .unwrap_err();
        match err {
            ProcessError::ProcessFailed { code, detail, .. } => {
                assert_eq!(code, 3);
                assert!(detail.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_times_out_and_reaps() {
        let err = run(
            &argv(&["sh", "-c", "sleep 30"]),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_spawn_failure() {
        let err = run(&argv(&["/nonexistent/tool-xyz"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let err = run(&[], None).await.unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommandLine));
    }

    #[tokio::test]
    async fn test_child_env_fixed() {
        let out = run(&argv(&["sh", "-c", "echo $TERM $MALLOC_ARENA_MAX"]), None)
            .await
            .unwrap();
        assert_eq!(out.stdout_str().trim(), "dumb 2");
    }

    #[tokio::test]
    async fn test_run_with_sink_appends() {
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("job.token");
        std::fs::write(&sink, "first line\n").unwrap();

        run_with_sink(&argv(&["sh", "-c", "echo from child"]), &sink)
            .await
            .unwrap();

        let content = std::fs::read_to_string(&sink).unwrap();
        assert!(content.starts_with("first line\n"));
        assert!(content.contains("from child"));
    }

    #[tokio::test]
    async fn test_run_with_sink_failure_keeps_log() {
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("job.token");

        let err = run_with_sink(&argv(&["sh", "-c", "echo diag >&2; exit 1"]), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::ProcessFailed { code: 1, .. }));

        let content = std::fs::read_to_string(&sink).unwrap();
        assert!(content.contains("diag"));
    }
}
