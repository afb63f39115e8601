//! Multipart upload intake
//!
//! Validates the file extension before any byte is written, then streams the
//! field to disk chunk by chunk under a generated name. A partially written
//! file is removed on every failure path.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use looplytic_common::{time, uuid_utils};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::models::{AudioExtension, UploadedAudio};

/// Multipart field carrying the audio file
pub const AUDIO_FIELD: &str = "audio";

const SEPARATION_TYPES: &[AudioExtension] = &[
    AudioExtension::Mp3,
    AudioExtension::Wav,
    AudioExtension::Flac,
    AudioExtension::M4a,
];

const ANALYSIS_TYPES: &[AudioExtension] = &[
    AudioExtension::Mp3,
    AudioExtension::Wav,
    AudioExtension::M4a,
    AudioExtension::Ogg,
    AudioExtension::Flac,
];

/// Accepts one audio file from a multipart request
#[derive(Debug, Clone)]
pub struct UploadReceiver {
    field_name: &'static str,
    allowed: &'static [AudioExtension],
    target_dir: PathBuf,
    max_bytes: u64,
}

impl UploadReceiver {
    pub fn new(
        field_name: &'static str,
        allowed: &'static [AudioExtension],
        target_dir: PathBuf,
        max_bytes: u64,
    ) -> Self {
        Self {
            field_name,
            allowed,
            target_dir,
            max_bytes,
        }
    }

    /// Inputs for stem separation (mp3, wav, flac, m4a)
    pub fn for_separation(uploads_dir: PathBuf, max_bytes: u64) -> Self {
        Self::new(AUDIO_FIELD, SEPARATION_TYPES, uploads_dir, max_bytes)
    }

    /// Inputs for chord analysis (adds ogg)
    pub fn for_analysis(analyzed_dir: PathBuf, max_bytes: u64) -> Self {
        Self::new(AUDIO_FIELD, ANALYSIS_TYPES, analyzed_dir, max_bytes)
    }

    /// Human-readable allow-list, e.g. "MP3, WAV, FLAC, or M4A"
    pub fn allowed_label(&self) -> String {
        let names: Vec<String> = self
            .allowed
            .iter()
            .map(|ext| ext.as_str().to_ascii_uppercase())
            .collect();
        match names.split_last() {
            None => String::new(),
            Some((only, [])) => only.clone(),
            Some((last, rest)) => format!("{}, or {}", rest.join(", "), last),
        }
    }

    /// Check a client file name against the allow-list
    pub fn accept_filename(&self, filename: &str) -> Result<AudioExtension, UploadError> {
        AudioExtension::from_filename(filename)
            .filter(|ext| self.allowed.contains(ext))
            .ok_or_else(|| UploadError::InvalidType {
                allowed: self.allowed_label(),
            })
    }

    /// Read the multipart body and store the audio field
    ///
    /// Fields other than the audio field are drained and ignored. The first
    /// audio field wins; nothing after it is read.
    pub async fn receive(&self, multipart: &mut Multipart) -> Result<UploadedAudio, UploadError> {
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => return Err(UploadError::MissingFile),
                Err(e) => return Err(self.map_multipart_error(e)),
            };

            if field.name() != Some(self.field_name) {
                debug!(field = ?field.name(), "Ignoring multipart field");
                continue;
            }

            let original_filename = match field.file_name() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => return Err(UploadError::MissingFile),
            };
            let extension = self.accept_filename(&original_filename)?;
            let content_type = field.content_type().map(str::to_string);

            return self
                .store(field, original_filename, extension, content_type)
                .await;
        }
    }

    async fn store(
        &self,
        mut field: Field<'_>,
        original_filename: String,
        extension: AudioExtension,
        content_type: Option<String>,
    ) -> Result<UploadedAudio, UploadError> {
        tokio::fs::create_dir_all(&self.target_dir).await?;

        let stored_name = format!(
            "audio-{}-{}.{}",
            time::unix_millis(),
            uuid_utils::file_token(),
            extension
        );
        let stored_path = self.target_dir.join(stored_name);

        // Owns the file from the first byte; dropping it on error removes it
        let mut upload = UploadedAudio::new(
            original_filename,
            stored_path,
            0,
            extension,
            content_type,
        );

        let mut file = tokio::fs::File::create(&upload.stored_path).await?;
        let mut written: u64 = 0;

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    upload.remove().await;
                    return Err(self.map_multipart_error(e));
                }
            };

            written += chunk.len() as u64;
            if written > self.max_bytes {
                drop(file);
                upload.remove().await;
                warn!(
                    filename = %upload.original_filename,
                    limit_bytes = self.max_bytes,
                    "Upload rejected: too large"
                );
                return Err(self.too_large());
            }

            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        upload.size_bytes = written;

        info!(
            filename = %upload.original_filename,
            path = %upload.stored_path.display(),
            size_mb = %format!("{:.2}", upload.size_mb()),
            "Upload stored"
        );
        Ok(upload)
    }

    fn too_large(&self) -> UploadError {
        UploadError::TooLarge {
            limit_mb: self.max_bytes / (1024 * 1024),
        }
    }

    fn map_multipart_error(&self, err: MultipartError) -> UploadError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            self.too_large()
        } else {
            UploadError::Malformed(err.body_text())
        }
    }
}
