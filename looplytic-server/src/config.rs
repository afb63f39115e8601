//! Runtime configuration for looplytic-server
//!
//! Resolved once at startup from the TOML bootstrap config and the root
//! folder, then shared read-only through `AppState`.

use looplytic_common::config::{RootFolderInitializer, TomlConfig, ToolchainConfig};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub port: u16,
    pub root_folder: PathBuf,
    /// Transient separation inputs
    pub uploads_dir: PathBuf,
    /// Retained chord-analysis uploads (served at `/analyzed`)
    pub analyzed_dir: PathBuf,
    /// Per-job separation outputs (served at `/separated`)
    pub separated_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub toolchain: ToolchainConfig,
}

impl ServiceConfig {
    pub fn from_toml(toml: &TomlConfig, root_folder: PathBuf) -> Self {
        let layout = RootFolderInitializer::new(root_folder.clone());
        Self {
            bind_address: toml.bind_address.clone(),
            port: toml.port,
            uploads_dir: layout.uploads_dir(),
            analyzed_dir: layout.analyzed_dir(),
            separated_dir: layout.separated_dir(),
            root_folder,
            max_upload_bytes: toml.limits.max_upload_bytes(),
            toolchain: toml.toolchain.clone(),
        }
    }

    /// Built-in defaults rooted at `root_folder`
    pub fn for_root(root_folder: PathBuf) -> Self {
        Self::from_toml(&TomlConfig::default(), root_folder)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
