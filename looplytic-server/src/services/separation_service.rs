//! Separation job pipeline
//!
//! Stages run in order within one job:
//! 1. Feature probe (best effort, never fatal)
//! 2. Capability check (fatal)
//! 3. Separation into the job's own directory (fatal)
//! 4. Stem assembly (fatal if any stem is missing)
//!
//! The input upload is removed exactly once when the job reaches a terminal
//! state, whichever stage ended it.

use looplytic_common::{AudioFeatureRecord, StemSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::JobError;
use crate::models::{JobFailure, JobOutcome, JobStatus, JobSuccess, SeparationJob};
use crate::services::feature_prober::{FeatureProber, ProbeOutcome};
use crate::services::result_assembler::ResultAssembler;
use crate::services::separation_invoker::SeparationInvoker;

type StageResult = Result<(StemSet, AudioFeatureRecord), (JobError, Option<AudioFeatureRecord>)>;

#[derive(Debug, Clone)]
pub struct SeparationService {
    prober: FeatureProber,
    invoker: SeparationInvoker,
    assembler: ResultAssembler,
}

impl SeparationService {
    pub fn new(config: &ServiceConfig) -> Self {
        let toolchain = &config.toolchain;
        Self {
            prober: FeatureProber::new(toolchain),
            invoker: SeparationInvoker::new(toolchain),
            assembler: ResultAssembler::new(
                config.separated_dir.clone(),
                toolchain.model.clone(),
                toolchain.stem_format.extension(),
            ),
        }
    }

    /// Drive `job` to a terminal state
    pub async fn run(&self, mut job: SeparationJob, cancel: &CancellationToken) -> JobOutcome {
        info!(
            session_id = %job.session_id,
            file = %job.upload.original_filename,
            size_mb = %format!("{:.2}", job.upload.size_mb()),
            "Processing file"
        );

        let result = self.execute(&mut job, cancel).await;

        // No-op if the separation stage already removed it
        job.upload.remove().await;

        match result {
            Ok((stems, analysis)) => {
                job.finish(JobStatus::Succeeded);
                info!(
                    session_id = %job.session_id,
                    elapsed_ms = job.elapsed().as_millis() as u64,
                    "Separation completed successfully"
                );
                Ok(JobSuccess {
                    session_id: job.session_id,
                    stems,
                    analysis,
                    original_file: job.upload.original_filename.clone(),
                    processing_time: job.elapsed(),
                })
            }
            Err((error, analysis)) => {
                job.finish(JobStatus::Failed);
                error!(
                    session_id = %job.session_id,
                    kind = error.kind(),
                    exit_code = ?job.exit_code,
                    error = %error,
                    "Separation job failed"
                );
                Err(JobFailure::new(job.session_id, error, analysis))
            }
        }
    }

    async fn execute(&self, job: &mut SeparationJob, cancel: &CancellationToken) -> StageResult {
        let input = job.upload.stored_path.clone();

        let probe = self.prober.probe(&input, cancel).await;
        if probe.outcome == ProbeOutcome::Cancelled {
            return Err((JobError::Cancelled, Some(probe.record)));
        }
        if !probe.outcome.is_measured() {
            warn!(session_id = %job.session_id, outcome = ?probe.outcome, "Using fallback audio analysis");
        }
        let analysis = probe.record;

        if let Err(e) = self.invoker.check_capability(cancel).await {
            return Err((e, Some(analysis)));
        }

        if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
            return Err((JobError::Io(e), Some(analysis)));
        }

        let separated = self.invoker.separate(&input, &job.output_dir, cancel).await;
        job.upload.remove().await;

        match &separated {
            Ok(output) => {
                job.exit_code = output.exit_code;
                job.diagnostics = output.combined();
            }
            Err(JobError::Process {
                exit_code,
                stderr,
                stdout,
            }) => {
                job.exit_code = *exit_code;
                job.diagnostics = format!("{}{}", stdout, stderr);
            }
            Err(_) => {}
        }
        if let Err(e) = separated {
            return Err((e, Some(analysis)));
        }

        match self
            .assembler
            .assemble(&job.output_dir, &job.upload.file_stem())
            .await
        {
            Ok(stems) => Ok((stems, analysis)),
            Err(e) => Err((e, Some(analysis))),
        }
    }
}
