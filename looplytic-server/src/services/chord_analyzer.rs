//! Chord estimation for retained uploads
//!
//! Runs the embedded chord script and returns tempo, key and the four
//! strongest major-triad matches. Unlike separation inputs, analyzed uploads
//! are kept and served from `/analyzed`.

use looplytic_common::config::ToolchainConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::process::{ProcessError, ToolCommand};

const CHORD_SCRIPT: &str = include_str!("../../scripts/chord_analyzer.py");

/// URL prefix under which retained analysis uploads are served
pub const ANALYZED_URL_PREFIX: &str = "/analyzed";

/// Chord analysis of one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordAnalysis {
    pub tempo: f64,
    pub key: String,
    pub scale: String,
    pub chords: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ChordError {
    #[error("Analysis failed")]
    Spawn(String),

    #[error("Analysis failed")]
    Failed { exit_code: Option<i32>, stderr: String },

    #[error("Analysis timed out")]
    TimedOut,

    #[error("Analysis cancelled: server shutting down")]
    Cancelled,

    #[error("Failed to parse analysis results")]
    Parse(String),

    /// Script reported an error in well-formed output
    #[error("{0}")]
    Reported(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChordReply {
    Failed { error: String },
    Analysis(ChordAnalysis),
}

/// Parse the script's stdout
pub fn parse_output(stdout: &str) -> Result<ChordAnalysis, ChordError> {
    match serde_json::from_str::<ChordReply>(stdout.trim()) {
        Ok(ChordReply::Analysis(analysis)) => Ok(analysis),
        Ok(ChordReply::Failed { error }) => Err(ChordError::Reported(error)),
        Err(e) => Err(ChordError::Parse(e.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct ChordAnalyzer {
    toolchain: ToolchainConfig,
}

impl ChordAnalyzer {
    pub fn new(toolchain: &ToolchainConfig) -> Self {
        Self {
            toolchain: toolchain.clone(),
        }
    }

    pub async fn analyze(
        &self,
        audio_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ChordAnalysis, ChordError> {
        let command = ToolCommand::python(&self.toolchain, "chord_analyzer")
            .arg("-c")
            .arg(CHORD_SCRIPT)
            .arg(audio_path)
            .arg(self.toolchain.analysis_window_secs.to_string());

        let output = match command.run(Some(self.toolchain.probe_timeout()), cancel).await {
            Ok(output) => output,
            Err(ProcessError::Spawn { program, source }) => {
                warn!(program = %program, error = %source, "Chord analyzer could not start");
                return Err(ChordError::Spawn(format!("{}: {}", program, source)));
            }
            Err(ProcessError::TimedOut { .. }) => return Err(ChordError::TimedOut),
            Err(ProcessError::Cancelled { .. }) => return Err(ChordError::Cancelled),
            Err(e @ ProcessError::Wait { .. }) => return Err(ChordError::Spawn(e.to_string())),
        };

        if !output.success {
            warn!(
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "Chord analyzer exited unsuccessfully"
            );
            return Err(ChordError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let analysis = parse_output(&output.stdout)?;
        info!(
            key = %analysis.key,
            tempo = analysis.tempo,
            chords = ?analysis.chords,
            "Chord analysis complete"
        );
        Ok(analysis)
    }
}
