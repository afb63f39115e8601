//! # LoopLytic Common Library
//!
//! Shared code for LoopLytic services including:
//! - Error type used across crates
//! - Bootstrap configuration loading and root folder resolution
//! - Audio analysis and stem types shared with API consumers
//! - Time and identifier utilities

pub mod audio;
pub mod config;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use audio::{AudioFeatureRecord, KeyMode, StemName, StemSet, TempoMarking};
pub use error::{Error, Result};
