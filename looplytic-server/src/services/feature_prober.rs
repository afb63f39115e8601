//! Best-effort musical feature extraction
//!
//! Runs the embedded librosa probe against an upload and turns its JSON
//! output into an [`AudioFeatureRecord`]. Probing never fails a job: every
//! failure mode substitutes a fallback record and is reported through
//! [`ProbeOutcome`] so callers and logs can tell them apart.

use looplytic_common::config::ToolchainConfig;
use looplytic_common::{AudioFeatureRecord, KeyMode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::process::{ProcessError, ToolCommand};

/// Probe script, passed inline to the interpreter with `-c`
const PROBE_SCRIPT: &str = include_str!("../../scripts/feature_probe.py");

/// How a probe attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Tool ran and produced usable features
    Measured,
    /// Interpreter could not be started
    SpawnFailed,
    /// Tool exceeded the probe timeout and was killed
    TimedOut,
    /// Tool exited non-zero
    ToolFailed { exit_code: Option<i32> },
    /// Tool exited zero but stdout was not a usable feature object
    Malformed,
    /// Tool printed `{"error": ...}`
    Reported(String),
    /// Server shutdown interrupted the probe
    Cancelled,
}

impl ProbeOutcome {
    pub fn is_measured(&self) -> bool {
        matches!(self, ProbeOutcome::Measured)
    }
}

/// Result of one probe; `record` is always usable
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub record: AudioFeatureRecord,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    fn fallback(outcome: ProbeOutcome) -> Self {
        let record = match outcome {
            ProbeOutcome::Reported(_) => AudioFeatureRecord::fallback_default_key(),
            _ => AudioFeatureRecord::fallback(),
        };
        Self { record, outcome }
    }
}

#[derive(Debug, Deserialize)]
struct RawFeatures {
    bpm: f64,
    key: String,
    mode: String,
    energy: f64,
    brightness: f64,
    duration: f64,
    rhythm_complexity: f64,
    spectral_rolloff: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProbeReply {
    Failed { error: String },
    Features(RawFeatures),
}

/// Interpret probe stdout
///
/// The whole output is tried first, then the last non-empty line (libraries
/// sometimes print warnings to stdout ahead of the result).
pub fn interpret_output(stdout: &str) -> ProbeReport {
    let trimmed = stdout.trim();
    let reply = serde_json::from_str::<ProbeReply>(trimmed).ok().or_else(|| {
        trimmed
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<ProbeReply>(line.trim()).ok())
    });

    match reply {
        Some(ProbeReply::Failed { error }) => ProbeReport::fallback(ProbeOutcome::Reported(error)),
        Some(ProbeReply::Features(raw)) => match to_record(raw) {
            Some(record) => ProbeReport {
                record,
                outcome: ProbeOutcome::Measured,
            },
            None => ProbeReport::fallback(ProbeOutcome::Malformed),
        },
        None => ProbeReport::fallback(ProbeOutcome::Malformed),
    }
}

fn to_record(raw: RawFeatures) -> Option<AudioFeatureRecord> {
    if !raw.bpm.is_finite() || raw.bpm <= 0.0 {
        return None;
    }
    let mode = KeyMode::parse(&raw.mode)?;
    // "A Minor" or just "A"
    let tonic = raw.key.split_whitespace().next()?;

    Some(AudioFeatureRecord::measured(
        raw.bpm.round() as u32,
        tonic,
        mode,
        raw.energy,
        raw.brightness,
        raw.duration,
        raw.rhythm_complexity,
        raw.spectral_rolloff,
    ))
}

/// Runs the feature probe with the configured interpreter
#[derive(Debug, Clone)]
pub struct FeatureProber {
    toolchain: ToolchainConfig,
}

impl FeatureProber {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            toolchain: toolchain.clone(),
        }
    }

    fn command(&self, audio_path: &Path) -> ToolCommand {
        ToolCommand::python(&self.toolchain, "feature_probe")
            .arg("-c")
            .arg(PROBE_SCRIPT)
            .arg(audio_path)
            .arg(self.toolchain.analysis_window_secs.to_string())
    }

    fn timeout(&self) -> Duration {
        self.toolchain.probe_timeout()
    }

    /// Probe `audio_path`; never returns an error
    pub async fn probe(&self, audio_path: &Path, cancel: &CancellationToken) -> ProbeReport {
        debug!(path = %audio_path.display(), "Probing audio features");

        let report = match self.command(audio_path).run(Some(self.timeout()), cancel).await {
            Ok(output) if output.success => interpret_output(&output.stdout),
            Ok(output) => {
                warn!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Feature probe exited unsuccessfully"
                );
                ProbeReport::fallback(ProbeOutcome::ToolFailed {
                    exit_code: output.exit_code,
                })
            }
            Err(ProcessError::Spawn { program, source }) => {
                warn!(program = %program, error = %source, "Feature probe could not start");
                ProbeReport::fallback(ProbeOutcome::SpawnFailed)
            }
            Err(ProcessError::TimedOut { timeout, .. }) => {
                warn!(timeout_secs = timeout.as_secs(), "Feature probe timed out");
                ProbeReport::fallback(ProbeOutcome::TimedOut)
            }
            Err(ProcessError::Cancelled { .. }) => ProbeReport::fallback(ProbeOutcome::Cancelled),
            Err(e @ ProcessError::Wait { .. }) => {
                warn!(error = %e, "Feature probe wait failed");
                ProbeReport::fallback(ProbeOutcome::SpawnFailed)
            }
        };

        match &report.outcome {
            ProbeOutcome::Measured => info!(
                bpm = report.record.bpm,
                key = %report.record.key,
                tempo = %report.record.tempo_description,
                "Audio analysis complete"
            ),
            ProbeOutcome::Reported(error) => warn!(error = %error, "Feature probe reported an error"),
            ProbeOutcome::Malformed => warn!("Feature probe output was not a feature object"),
            _ => {}
        }

        report
    }
}
