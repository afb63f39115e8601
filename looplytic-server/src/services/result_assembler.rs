//! Stem discovery after a successful separation
//!
//! Demucs writes `<out>/<model>/<input_stem>/<stem>.<ext>`. The assembler
//! checks each expected file and maps it to a public URL under
//! `/separated`. It never moves or deletes anything.

use looplytic_common::{StemName, StemSet};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::JobError;

/// URL prefix under which the separated root is served
pub const SEPARATED_URL_PREFIX: &str = "/separated";

#[derive(Debug, Clone)]
pub struct ResultAssembler {
    separated_root: PathBuf,
    model: String,
    extension: &'static str,
}

impl ResultAssembler {
    pub fn new(separated_root: PathBuf, model: String, extension: &'static str) -> Self {
        Self {
            separated_root,
            model,
            extension,
        }
    }

    /// Directory the tool writes this input's stems into
    pub fn expected_dir(&self, job_dir: &Path, input_stem: &str) -> PathBuf {
        job_dir.join(&self.model).join(input_stem)
    }

    pub fn expected_path(&self, job_dir: &Path, input_stem: &str, stem: StemName) -> PathBuf {
        self.expected_dir(job_dir, input_stem)
            .join(format!("{}.{}", stem.as_str(), self.extension))
    }

    /// Public URL of a file below the separated root
    ///
    /// Returns None for paths outside the root.
    pub fn public_url(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.separated_root).ok()?;
        let mut url = String::from(SEPARATED_URL_PREFIX);
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    url.push('/');
                    url.push_str(&part.to_string_lossy());
                }
                _ => return None,
            }
        }
        Some(url)
    }

    /// Collect all four stems or report which are missing
    pub async fn assemble(&self, job_dir: &Path, input_stem: &str) -> Result<StemSet, JobError> {
        let expected_dir = self.expected_dir(job_dir, input_stem);
        debug!(dir = %expected_dir.display(), "Looking for separated files");

        let mut found = BTreeMap::new();
        for stem in StemName::ALL {
            let path = self.expected_path(job_dir, input_stem, stem);
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if !exists {
                error!(stem = %stem, path = %path.display(), "Missing stem file");
                continue;
            }
            match self.public_url(&path) {
                Some(url) => {
                    info!(stem = %stem, path = %path.display(), "Stem ready");
                    found.insert(stem, url);
                }
                None => {
                    return Err(JobError::Internal(format!(
                        "Stem {} is outside the separated root",
                        path.display()
                    )))
                }
            }
        }

        let generated: Vec<StemName> = found.keys().copied().collect();
        StemSet::from_map(found).map_err(|missing| JobError::MissingStems {
            missing,
            expected_dir,
            generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expected_path_layout() {
        let assembler = ResultAssembler::new(PathBuf::from("/srv/sep"), "htdemucs".into(), "mp3");
        let path = assembler.expected_path(Path::new("/srv/sep/abc"), "audio-1-x", StemName::Bass);
        assert_eq!(path, PathBuf::from("/srv/sep/abc/htdemucs/audio-1-x/bass.mp3"));
    }

    #[test]
    fn test_public_url_uses_forward_slashes() {
        let assembler = ResultAssembler::new(PathBuf::from("/srv/sep"), "htdemucs".into(), "mp3");
        let url = assembler.public_url(Path::new("/srv/sep/abc/htdemucs/audio-1-x/vocals.mp3"));
        assert_eq!(url.as_deref(), Some("/separated/abc/htdemucs/audio-1-x/vocals.mp3"));

        assert_eq!(assembler.public_url(Path::new("/etc/passwd")), None);
    }

    #[tokio::test]
    async fn test_assemble_reports_missing_and_generated() {
        let root = TempDir::new().unwrap();
        let assembler = ResultAssembler::new(root.path().to_path_buf(), "htdemucs".into(), "wav");
        let job_dir = root.path().join("job");
        let dir = assembler.expected_dir(&job_dir, "audio-1-x");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("vocals.wav"), b"v").unwrap();
        std::fs::write(dir.join("drums.wav"), b"d").unwrap();

        match assembler.assemble(&job_dir, "audio-1-x").await.unwrap_err() {
            JobError::MissingStems {
                missing,
                expected_dir,
                generated,
            } => {
                assert_eq!(missing, vec![StemName::Bass, StemName::Other]);
                assert_eq!(generated, vec![StemName::Vocals, StemName::Drums]);
                assert_eq!(expected_dir, dir);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Nothing was removed
        assert!(dir.join("vocals.wav").exists());
    }

    #[tokio::test]
    async fn test_assemble_complete_set() {
        let root = TempDir::new().unwrap();
        let assembler = ResultAssembler::new(root.path().to_path_buf(), "htdemucs".into(), "mp3");
        let job_dir = root.path().join("s1");
        let dir = assembler.expected_dir(&job_dir, "audio-2-y");
        std::fs::create_dir_all(&dir).unwrap();
        for stem in StemName::ALL {
            std::fs::write(dir.join(format!("{stem}.mp3")), b"x").unwrap();
        }

        let stems = assembler.assemble(&job_dir, "audio-2-y").await.unwrap();
        assert_eq!(stems.other, "/separated/s1/htdemucs/audio-2-y/other.mp3");
        assert_eq!(stems.iter().count(), 4);
    }
}
