//! Uploaded audio files
//!
//! An `UploadedAudio` owns its stored file. The file is removed exactly once:
//! either explicitly through [`UploadedAudio::remove`] when the owning job
//! finishes, or by the drop guard if the owner is abandoned (panic, early
//! return) before that. Uploads that must outlive the request are released
//! with [`UploadedAudio::persist`].

use looplytic_common::uuid_utils;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Audio container accepted by an upload endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioExtension {
    Mp3,
    Wav,
    Flac,
    M4a,
    Ogg,
}

impl AudioExtension {
    /// Extension of `filename`, case-insensitive
    ///
    /// Returns None for names without an extension or with an unknown one.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioExtension::Mp3),
            "wav" => Some(AudioExtension::Wav),
            "flac" => Some(AudioExtension::Flac),
            "m4a" => Some(AudioExtension::M4a),
            "ogg" => Some(AudioExtension::Ogg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioExtension::Mp3 => "mp3",
            AudioExtension::Wav => "wav",
            AudioExtension::Flac => "flac",
            AudioExtension::M4a => "m4a",
            AudioExtension::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted upload stored on disk
#[derive(Debug)]
pub struct UploadedAudio {
    pub id: Uuid,
    /// Client-supplied file name
    pub original_filename: String,
    /// Generated storage path (never derived from the client name)
    pub stored_path: PathBuf,
    pub size_bytes: u64,
    pub extension: AudioExtension,
    /// MIME type declared by the client, if any
    pub content_type: Option<String>,
    released: AtomicBool,
}

impl UploadedAudio {
    pub fn new(
        original_filename: String,
        stored_path: PathBuf,
        size_bytes: u64,
        extension: AudioExtension,
        content_type: Option<String>,
    ) -> Self {
        Self {
            id: uuid_utils::generate(),
            original_filename,
            stored_path,
            size_bytes,
            extension,
            content_type,
            released: AtomicBool::new(false),
        }
    }

    /// Stored file name without its extension
    ///
    /// The separation tool names its per-track output directory after this.
    pub fn file_stem(&self) -> String {
        self.stored_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Stored file name including extension
    pub fn file_name(&self) -> String {
        self.stored_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Delete the stored file
    ///
    /// Only the first call (across this method, `persist` and drop) acts;
    /// later calls return false. A file that is already gone counts as
    /// removed. Other failures are logged and never propagated.
    pub async fn remove(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        match tokio::fs::remove_file(&self.stored_path).await {
            Ok(()) => debug!(path = %self.stored_path.display(), "Input file cleaned up"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.stored_path.display(), "Input file already removed")
            }
            Err(e) => warn!(
                path = %self.stored_path.display(),
                error = %e,
                "Could not delete input file"
            ),
        }
        true
    }

    /// Keep the stored file past the lifetime of this value
    pub fn persist(self) -> PathBuf {
        self.released.store(true, Ordering::SeqCst);
        self.stored_path.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for UploadedAudio {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        match std::fs::remove_file(&self.stored_path) {
            Ok(()) => debug!(path = %self.stored_path.display(), "Abandoned upload removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.stored_path.display(),
                error = %e,
                "Could not delete abandoned upload"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stored(dir: &TempDir, name: &str) -> UploadedAudio {
        let path = dir.path().join(name);
        std::fs::write(&path, b"fake audio").unwrap();
        UploadedAudio::new(
            "song.mp3".to_string(),
            path,
            10,
            AudioExtension::Mp3,
            Some("audio/mpeg".to_string()),
        )
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(AudioExtension::from_filename("a.MP3"), Some(AudioExtension::Mp3));
        assert_eq!(AudioExtension::from_filename("a.b.FlAc"), Some(AudioExtension::Flac));
        assert_eq!(AudioExtension::from_filename("notes.txt"), None);
        assert_eq!(AudioExtension::from_filename("noextension"), None);
    }

    #[tokio::test]
    async fn test_remove_acts_exactly_once() {
        let dir = TempDir::new().unwrap();
        let upload = stored(&dir, "audio-1-abc.mp3");
        let path = upload.stored_path.clone();

        assert!(upload.remove().await);
        assert!(!path.exists());
        assert!(!upload.remove().await);
        assert!(upload.is_released());
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let upload = stored(&dir, "audio-2-abc.mp3");
        std::fs::remove_file(&upload.stored_path).unwrap();

        assert!(upload.remove().await);
    }

    #[test]
    fn test_drop_removes_abandoned_upload() {
        let dir = TempDir::new().unwrap();
        let upload = stored(&dir, "audio-3-abc.mp3");
        let path = upload.stored_path.clone();

        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_keeps_file() {
        let dir = TempDir::new().unwrap();
        let upload = stored(&dir, "audio-4-abc.mp3");

        let path = upload.persist();
        assert!(path.exists());
    }

    #[test]
    fn test_file_stem_uses_stored_name() {
        let dir = TempDir::new().unwrap();
        let upload = stored(&dir, "audio-5-abc.mp3");
        assert_eq!(upload.file_stem(), "audio-5-abc");
        assert_eq!(upload.file_name(), "audio-5-abc.mp3");
    }
}
