//! Separation tool availability
//!
//! Spawns the interpreter with a one-line import check. Used both as the
//! pre-flight step of every job and by the stateless `/api/check-demucs`
//! endpoint.

use looplytic_common::config::ToolchainConfig;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::services::process::{ProcessError, ToolCommand};

const CHECK_SCRIPT: &str = "import demucs; print('Demucs ready')";
const READY_SENTINEL: &str = "Demucs ready";

/// Remediation shown when the interpreter itself is unavailable
pub const INSTALL_HINT: &str = "pip3 install demucs torch torchaudio";

/// The import check is expected to finish quickly
const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one capability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    Ready,
    /// Interpreter ran but the package is missing or broken
    Missing {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// Interpreter could not be run at all
    Unavailable(String),
}

/// Body of `GET /api/check-demucs`
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub installed: bool,
    pub message: String,
}

impl From<&CapabilityStatus> for CapabilityReport {
    fn from(status: &CapabilityStatus) -> Self {
        match status {
            CapabilityStatus::Ready => Self {
                installed: true,
                message: "Demucs is properly installed".to_string(),
            },
            CapabilityStatus::Missing { .. } => Self {
                installed: false,
                message: "Demucs not found".to_string(),
            },
            CapabilityStatus::Unavailable(reason) => Self {
                installed: false,
                message: format!("Python3 or Demucs not available: {}", reason),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    toolchain: ToolchainConfig,
}

impl CapabilityProbe {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            toolchain: toolchain.clone(),
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::python(&self.toolchain, "capability_check")
            .arg("-c")
            .arg(CHECK_SCRIPT)
    }

    /// Run the import check
    ///
    /// A zero exit without the sentinel on stdout counts as missing.
    pub async fn check(&self, cancel: &CancellationToken) -> CapabilityStatus {
        let status = match self.command().run(Some(CHECK_TIMEOUT), cancel).await {
            Ok(output) if output.success && output.stdout.contains(READY_SENTINEL) => {
                CapabilityStatus::Ready
            }
            Ok(output) => CapabilityStatus::Missing {
                exit_code: output.exit_code,
                stderr: output.stderr,
            },
            Err(ProcessError::Spawn { program, source }) => {
                CapabilityStatus::Unavailable(format!("{}: {}", program, source))
            }
            Err(e) => CapabilityStatus::Unavailable(e.to_string()),
        };

        match &status {
            CapabilityStatus::Ready => debug!("Separation tool ready"),
            CapabilityStatus::Missing { exit_code, stderr } => warn!(
                exit_code = ?exit_code,
                stderr = %stderr.trim(),
                "Separation tool import check failed"
            ),
            CapabilityStatus::Unavailable(reason) => {
                warn!(reason = %reason, "Separation tool interpreter unavailable")
            }
        }
        status
    }

    /// Stateless report for the capability endpoint
    pub async fn report(&self, cancel: &CancellationToken) -> CapabilityReport {
        CapabilityReport::from(&self.check(cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_messages() {
        let ready = CapabilityReport::from(&CapabilityStatus::Ready);
        assert!(ready.installed);

        let missing = CapabilityReport::from(&CapabilityStatus::Missing {
            exit_code: Some(1),
            stderr: "ModuleNotFoundError".to_string(),
        });
        assert!(!missing.installed);
        assert_eq!(missing.message, "Demucs not found");

        let unavailable =
            CapabilityReport::from(&CapabilityStatus::Unavailable("python3: not found".to_string()));
        assert!(!unavailable.installed);
        assert!(unavailable.message.contains("python3: not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let toolchain = ToolchainConfig {
            python: "/nonexistent/python3".into(),
            ..ToolchainConfig::default()
        };
        let status = CapabilityProbe::new(&toolchain)
            .check(&CancellationToken::new())
            .await;
        assert!(matches!(status, CapabilityStatus::Unavailable(_)));
    }
}
