//! Demucs invocation
//!
//! Builds the separation command line, gates it on the capability check and
//! maps every way the process can end onto a [`JobError`].

use looplytic_common::config::{StemFormat, ToolchainConfig};
use std::ffi::OsString;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::JobError;
use crate::services::capability::{CapabilityProbe, CapabilityStatus, INSTALL_HINT};
use crate::services::process::{ProcessError, ProcessOutput, ToolCommand};

#[derive(Debug, Clone)]
pub struct SeparationInvoker {
    toolchain: ToolchainConfig,
    capability: CapabilityProbe,
}

impl SeparationInvoker {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            toolchain: toolchain.clone(),
            capability: CapabilityProbe::new(toolchain),
        }
    }

    /// Pre-flight check; a job must not start separation unless this passes
    pub async fn check_capability(&self, cancel: &CancellationToken) -> Result<(), JobError> {
        let status = self.capability.check(cancel).await;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        match status {
            CapabilityStatus::Ready => Ok(()),
            CapabilityStatus::Missing { stderr, .. } => Err(JobError::Capability {
                reason: "Demucs not properly installed or configured".to_string(),
                details: Some(stderr).filter(|s| !s.trim().is_empty()),
            }),
            CapabilityStatus::Unavailable(reason) => Err(JobError::Capability {
                reason: format!("Demucs not installed. Run: {}", INSTALL_HINT),
                details: Some(reason),
            }),
        }
    }

    /// Arguments after the interpreter prefix
    pub fn separation_args(&self, input: &Path, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            "demucs.separate".into(),
            "--name".into(),
            self.toolchain.model.clone().into(),
            "--out".into(),
            out_dir.into(),
        ];
        if self.toolchain.stem_format == StemFormat::Mp3 {
            args.push("--mp3".into());
            args.push("--mp3-bitrate".into());
            args.push(self.toolchain.mp3_bitrate.to_string().into());
        }
        args.push("--jobs".into());
        args.push(self.toolchain.jobs.to_string().into());
        args.push(input.into());
        args
    }

    /// Run separation of `input` into `out_dir`
    ///
    /// Ok only for a zero exit. The output is returned so the caller can
    /// keep it as job diagnostics.
    pub async fn separate(
        &self,
        input: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, JobError> {
        let command = ToolCommand::python(&self.toolchain, "demucs")
            .args(self.separation_args(input, out_dir));

        info!(
            model = %self.toolchain.model,
            input = %input.display(),
            out = %out_dir.display(),
            "Starting Demucs separation"
        );

        match command
            .run(Some(self.toolchain.separation_timeout()), cancel)
            .await
        {
            Ok(output) if output.success => {
                info!(exit_code = ?output.exit_code, "Demucs process finished");
                Ok(output)
            }
            Ok(output) => {
                warn!(exit_code = ?output.exit_code, "Demucs process failed");
                Err(JobError::Process {
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                    stdout: output.stdout,
                })
            }
            Err(ProcessError::Spawn { program, source }) => Err(JobError::Spawn { program, source }),
            Err(ProcessError::TimedOut { timeout, .. }) => {
                warn!(timeout_secs = timeout.as_secs(), "Demucs process killed after timeout");
                Err(JobError::Timeout { after: timeout })
            }
            Err(ProcessError::Cancelled { .. }) => Err(JobError::Cancelled),
            Err(e @ ProcessError::Wait { .. }) => Err(JobError::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_default_args_request_mp3() {
        let invoker = SeparationInvoker::new(&ToolchainConfig::default());
        let args = invoker.separation_args(Path::new("/up/audio-1-x.mp3"), Path::new("/sep/job"));

        assert_eq!(
            strings(&args),
            [
                "-m",
                "demucs.separate",
                "--name",
                "htdemucs",
                "--out",
                "/sep/job",
                "--mp3",
                "--mp3-bitrate",
                "320",
                "--jobs",
                "4",
                "/up/audio-1-x.mp3",
            ]
        );
    }

    #[test]
    fn test_wav_output_omits_mp3_flags() {
        let toolchain = ToolchainConfig {
            stem_format: StemFormat::Wav,
            jobs: 2,
            ..ToolchainConfig::default()
        };
        let args = strings(
            &SeparationInvoker::new(&toolchain)
                .separation_args(Path::new("in.wav"), Path::new("out")),
        );

        assert!(!args.iter().any(|a| a.starts_with("--mp3")));
        assert_eq!(&args[args.len() - 3..], ["--jobs", "2", "in.wav"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_interpreter_is_capability_error() {
        let toolchain = ToolchainConfig {
            python: "/nonexistent/python3".into(),
            ..ToolchainConfig::default()
        };
        let err = SeparationInvoker::new(&toolchain)
            .check_capability(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "capability");
        assert!(err.to_string().contains(INSTALL_HINT));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unstartable_interpreter_is_spawn_failure() {
        let toolchain = ToolchainConfig {
            python: "/nonexistent/python3".into(),
            ..ToolchainConfig::default()
        };
        let out = tempfile::tempdir().unwrap();
        let err = SeparationInvoker::new(&toolchain)
            .separate(Path::new("in.mp3"), out.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Spawn { .. }));
        assert_eq!(err.kind(), "spawn_failure");
        assert_eq!(err.exit_code(), None);
    }
}
