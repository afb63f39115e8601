//! Service modules for the separation and analysis workflows

pub mod capability;
pub mod chord_analyzer;
pub mod feature_prober;
pub mod job_registry;
pub mod process;
pub mod result_assembler;
pub mod separation_invoker;
pub mod separation_service;
pub mod upload_receiver;

pub use capability::{CapabilityProbe, CapabilityReport, CapabilityStatus};
pub use chord_analyzer::{ChordAnalysis, ChordAnalyzer, ChordError};
pub use feature_prober::{FeatureProber, ProbeOutcome, ProbeReport};
pub use job_registry::{ActiveJob, ActiveJobGuard, JobRegistry};
pub use process::{ProcessError, ProcessOutput, ToolCommand};
pub use result_assembler::ResultAssembler;
pub use separation_invoker::SeparationInvoker;
pub use separation_service::SeparationService;
pub use upload_receiver::UploadReceiver;
