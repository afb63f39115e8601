//! Domain models for separation jobs and uploads

pub mod job;
pub mod upload;

pub use job::{
    CompletionLatch, JobFailure, JobOutcome, JobResponder, JobStatus, JobSuccess, SeparationJob,
};
pub use upload::{AudioExtension, UploadedAudio};
