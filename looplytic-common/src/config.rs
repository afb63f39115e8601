//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every field has a built-in
//! default, so a missing file is not fatal: the service logs a warning and
//! starts with defaults.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `LOOPLYTIC_ROOT_FOLDER` environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::time::secs_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "LOOPLYTIC_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Folder holding `uploads/` and `separated/`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Upload limits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest accepted upload in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

/// Output container requested from the separation tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StemFormat {
    Mp3,
    Wav,
}

impl StemFormat {
    /// File extension of produced stems
    pub fn extension(&self) -> &'static str {
        match self {
            StemFormat::Mp3 => "mp3",
            StemFormat::Wav => "wav",
        }
    }
}

/// External Python tool-chain settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolchainConfig {
    /// Python interpreter with demucs and librosa installed
    #[serde(default = "default_python")]
    pub python: PathBuf,

    /// Arguments placed before every script invocation (e.g. `-u`)
    #[serde(default)]
    pub python_args: Vec<String>,

    /// Demucs model name; also the first directory level of its output
    #[serde(default = "default_model")]
    pub model: String,

    /// Worker hint passed through to `--jobs`
    #[serde(default = "default_jobs")]
    pub jobs: u32,

    #[serde(default = "default_stem_format")]
    pub stem_format: StemFormat,

    /// Only used when `stem_format = "mp3"`
    #[serde(default = "default_mp3_bitrate")]
    pub mp3_bitrate: u32,

    /// Seconds of audio loaded for feature and chord analysis
    #[serde(default = "default_analysis_window_secs")]
    pub analysis_window_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_separation_timeout_secs")]
    pub separation_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_upload_mb() -> u64 {
    100
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

fn default_model() -> String {
    "htdemucs".to_string()
}

fn default_jobs() -> u32 {
    4
}

fn default_stem_format() -> StemFormat {
    StemFormat::Mp3
}

fn default_mp3_bitrate() -> u32 {
    320
}

fn default_analysis_window_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    120
}

fn default_separation_timeout_secs() -> u64 {
    3600
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
            limits: LimitsConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            python_args: Vec::new(),
            model: default_model(),
            jobs: default_jobs(),
            stem_format: default_stem_format(),
            mp3_bitrate: default_mp3_bitrate(),
            analysis_window_secs: default_analysis_window_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            separation_timeout_secs: default_separation_timeout_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl ToolchainConfig {
    pub fn probe_timeout(&self) -> Duration {
        secs_to_duration(self.probe_timeout_secs)
    }

    pub fn separation_timeout(&self) -> Duration {
        secs_to_duration(self.separation_timeout_secs)
    }
}

impl TomlConfig {
    /// Parse a TOML config file
    ///
    /// # Errors
    /// Returns `Error::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML {}: {}", path.display(), e)))
    }

    /// Load the config file if present, otherwise fall back to defaults
    ///
    /// A missing file is not an error. A file that exists but does not parse is.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(p) => p,
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            warn!("Config file {} not found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!("Loaded TOML configuration from {}", path.display());
        Ok(config)
    }
}

/// Write a TOML config file (used to seed a config with defaults)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize TOML: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Platform config file location (`~/.config/looplytic/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("looplytic").join("config.toml"))
}

/// OS-dependent default root folder path
pub fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("looplytic"))
        .unwrap_or_else(|| PathBuf::from("./looplytic_data"))
}

/// Resolves the root folder from CLI, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self { cli_arg }
    }

    pub fn resolve(&self, toml_config: &TomlConfig) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder: {} (from command line)", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder: {} (from {})", path, ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &toml_config.root_folder {
            info!("Root folder: {} (from TOML)", path.display());
            return path.clone();
        }

        let path = get_default_root_folder();
        info!("Root folder: {} (compiled default)", path.display());
        path
    }
}

/// Directory layout under the root folder
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Transient separation inputs
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Retained chord-analysis uploads, served publicly
    pub fn analyzed_dir(&self) -> PathBuf {
        self.uploads_dir().join("analyzed")
    }

    /// Public root of per-job separation outputs
    pub fn separated_dir(&self) -> PathBuf {
        self.root.join("separated")
    }

    /// Create the root folder and its subdirectories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.analyzed_dir(), self.separated_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.limits.max_upload_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.toolchain.model, "htdemucs");
        assert_eq!(config.toolchain.jobs, 4);
        assert_eq!(config.toolchain.stem_format, StemFormat::Mp3);
        assert_eq!(config.toolchain.analysis_window_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_toml_equals_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6000
            [toolchain]
            stem_format = "wav"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.toolchain.stem_format, StemFormat::Wav);
        assert_eq!(config.toolchain.mp3_bitrate, 320);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_stem_format_extension() {
        assert_eq!(StemFormat::Mp3.extension(), "mp3");
        assert_eq!(StemFormat::Wav.extension(), "wav");
    }

    #[test]
    fn test_layout_paths() {
        let init = RootFolderInitializer::new(PathBuf::from("/data"));
        assert_eq!(init.uploads_dir(), PathBuf::from("/data/uploads"));
        assert_eq!(init.analyzed_dir(), PathBuf::from("/data/uploads/analyzed"));
        assert_eq!(init.separated_dir(), PathBuf::from("/data/separated"));
    }

    #[test]
    fn test_huge_upload_limit_saturates() {
        let limits = LimitsConfig {
            max_upload_mb: u64::MAX / 2,
        };
        assert_eq!(limits.max_upload_bytes(), u64::MAX);

        let limits: LimitsConfig = toml::from_str("max_upload_mb = 9223372036854775807").unwrap();
        assert_eq!(limits.max_upload_bytes(), u64::MAX);
    }
}
