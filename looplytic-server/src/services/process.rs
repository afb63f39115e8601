//! External process execution
//!
//! Runs a tool with stdout and stderr piped. Both streams are read
//! incrementally as the process runs (separation can take minutes), logged
//! chunk by chunk at debug level, and retained in full for diagnostics.
//!
//! Waiting races three events: process exit, an optional deadline, and a
//! cancellation token. On deadline or cancellation the child is killed.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use looplytic_common::config::ToolchainConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long to keep draining pipes after the child is gone
///
/// Grandchildren may inherit and hold the pipes open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Captured result of a process that ran to exit
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// None when terminated by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout followed by stderr, for job diagnostics
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Process did not run to a normal exit
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not exit within {} seconds", .timeout.as_secs())]
    TimedOut {
        program: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Description of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    /// Short name used in log fields
    label: &'static str,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            label,
        }
    }

    /// Configured interpreter with its prefix arguments already applied
    pub fn python(toolchain: &ToolchainConfig, label: &'static str) -> Self {
        Self::new(&toolchain.python, label).args(&toolchain.python_args)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Spawn and wait for exit, capturing both output streams
    ///
    /// # Errors
    /// `Spawn` if the executable could not be started, `TimedOut` /
    /// `Cancelled` if the child was killed, `Wait` if the OS wait failed.
    /// A non-zero exit is not an error; inspect [`ProcessOutput::success`].
    pub async fn run(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program_name(),
                source,
            })?;

        debug!(tool = self.label, pid = ?child.id(), "Process started");

        let stdout_capture = Capture::spawn(child.stdout.take(), self.label, "stdout");
        let stderr_capture = Capture::spawn(child.stderr.take(), self.label, "stderr");

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        enum Ended {
            Exited(std::io::Result<std::process::ExitStatus>),
            DeadlineReached,
            Cancelled,
        }

        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = deadline => Ended::DeadlineReached,
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        if !matches!(ended, Ended::Exited(_)) {
            if let Err(e) = child.kill().await {
                debug!(tool = self.label, error = %e, "Kill after deadline/cancel failed");
            }
        }

        let (stdout, stderr) = tokio::join!(
            stdout_capture.finish(self.label, "stdout"),
            stderr_capture.finish(self.label, "stderr"),
        );

        match ended {
            Ended::Exited(Ok(status)) => {
                debug!(tool = self.label, exit_code = ?status.code(), "Process exited");
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    success: status.success(),
                    stdout,
                    stderr,
                })
            }
            Ended::Exited(Err(source)) => Err(ProcessError::Wait {
                program: self.program_name(),
                source,
            }),
            Ended::DeadlineReached => Err(ProcessError::TimedOut {
                program: self.program_name(),
                timeout: timeout.unwrap_or_default(),
                stdout,
                stderr,
            }),
            Ended::Cancelled => Err(ProcessError::Cancelled {
                program: self.program_name(),
            }),
        }
    }
}

/// Output stream being read in the background
///
/// Bytes land in the shared buffer as they arrive, so whatever was read is
/// still available if the reader has to be abandoned.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(reader: Option<R>, label: &'static str, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };

            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = &buf[..n];
                        debug!(tool = label, stream, "{}", String::from_utf8_lossy(chunk).trim_end());
                        sink.lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(chunk);
                    }
                    Err(e) => {
                        debug!(tool = label, stream, error = %e, "Stream read failed");
                        break;
                    }
                }
            }
        });

        Self { buffer, task }
    }

    /// Wait up to [`DRAIN_GRACE`] for end of stream, then return what was read
    async fn finish(mut self, label: &'static str, stream: &'static str) -> String {
        if tokio::time::timeout(DRAIN_GRACE, &mut self.task).await.is_err() {
            debug!(tool = label, stream, "Pipe still open after exit, keeping partial output");
            self.task.abort();
        }

        let captured = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&captured).into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("/bin/sh", "test").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let output = sh("echo out; echo err >&2; exit 3")
            .run(None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[test]
    fn test_python_prefix_args_come_first() {
        let toolchain = ToolchainConfig {
            python_args: vec!["-u".to_string()],
            ..ToolchainConfig::default()
        };
        let cmd = ToolCommand::python(&toolchain, "test").arg("-c").arg("pass");

        assert_eq!(cmd.program(), Path::new("python3"));
        assert_eq!(cmd.get_args(), &["-u", "-c", "pass"].map(OsString::from));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_distinct() {
        let err = ToolCommand::new("/definitely/not/here", "test")
            .run(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_deadline_kills_child() {
        let started = std::time::Instant::now();
        let err = sh("echo begun; exec sleep 30")
            .run(Some(Duration::from_millis(200)), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProcessError::TimedOut { stdout, .. } => assert_eq!(stdout.trim(), "begun"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = sh("exec sleep 30").run(None, &token).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_output_kept_when_background_child_holds_pipes() {
        let started = std::time::Instant::now();
        let output = sh("echo 'RuntimeError: boom' >&2; echo progress; sleep 5 & exit 1")
            .run(None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.stderr.trim(), "RuntimeError: boom");
        assert_eq!(output.stdout.trim(), "progress");
        // Both streams drain concurrently within one grace period
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_large_output_is_retained() {
        let output = sh("i=0; while [ $i -lt 5000 ]; do echo line$i; i=$((i+1)); done")
            .run(None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.lines().count(), 5000);
    }
}
