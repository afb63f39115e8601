//! HTTP API handlers for looplytic-server

pub mod buildinfo;
pub mod capability;
pub mod chord;
pub mod health;
pub mod separate;

pub use buildinfo::get_build_info;
pub use capability::check_demucs;
pub use chord::analyze_chords;
pub use health::health_routes;
pub use separate::separate_audio;
