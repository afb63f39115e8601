//! Shared test harness
//!
//! The service is pointed at `/bin/sh` with a generated script as its first
//! argument, so the script stands in for the Python interpreter. It
//! dispatches on the arguments it receives (capability check, feature
//! probe, chord script, `-m demucs.separate`) and appends one line per
//! invocation to a log file.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header, Request},
    Router,
};
use looplytic_common::config::RootFolderInitializer;
use looplytic_server::config::ServiceConfig;
use looplytic_server::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const BOUNDARY: &str = "looplytic-test-boundary";

pub const PROBE_JSON: &str = r#"{"bpm": 128, "key": "A Minor", "mode": "Minor", "energy": 41.2, "brightness": 2210.5, "duration": 184.3, "rhythm_complexity": 0.12, "spectral_rolloff": 4550.0}"#;

pub const CHORD_JSON: &str =
    r#"{"tempo": 123.05, "key": "G", "scale": "G Major", "chords": ["G", "C", "D", "E"]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Ready,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Measured,
    ExitNonZero,
    Garbage,
    Reported,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separate {
    Complete,
    Fail,
    Partial,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chord {
    Analyzed,
    Fail,
    Garbage,
    Reported,
}

/// Behaviour of the fake tool chain
#[derive(Debug, Clone, Copy)]
pub struct FakeTools {
    pub capability: Capability,
    pub probe: Probe,
    pub separate: Separate,
    pub chord: Chord,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            capability: Capability::Ready,
            probe: Probe::Measured,
            separate: Separate::Complete,
            chord: Chord::Analyzed,
        }
    }
}

impl FakeTools {
    fn script(&self, log: &Path) -> String {
        let capability = match self.capability {
            Capability::Ready => "echo 'Demucs ready'",
            Capability::Missing => {
                "echo \"ModuleNotFoundError: No module named 'demucs'\" >&2; exit 1"
            }
        };
        let probe = match self.probe {
            Probe::Measured => format!("echo '{}'", PROBE_JSON),
            Probe::ExitNonZero => "echo 'Traceback: librosa missing' >&2; exit 1".to_string(),
            Probe::Garbage => "echo 'not json at all'".to_string(),
            Probe::Reported => "echo '{\"error\": \"Audio buffer is empty\"}'".to_string(),
            Probe::Hang => "exec sleep 30".to_string(),
        };
        let separate = match self.separate {
            Separate::Complete => concat!(
                "mkdir -p \"$dir\"; ",
                "for s in vocals drums bass other; do echo stem > \"$dir/$s.mp3\"; done; ",
                "echo \"Separated tracks will be stored in $dir\""
            ),
            Separate::Fail => "echo 'RuntimeError: CUDA out of memory' >&2; exit 1",
            Separate::Partial => concat!(
                "mkdir -p \"$dir\"; ",
                "echo stem > \"$dir/vocals.mp3\"; echo stem > \"$dir/drums.mp3\""
            ),
            Separate::Hang => "exec sleep 30",
        };
        let chord = match self.chord {
            Chord::Analyzed => format!("echo '{}'", CHORD_JSON),
            Chord::Fail => "echo 'Traceback' >&2; exit 2".to_string(),
            Chord::Garbage => "echo 'definitely not json'".to_string(),
            Chord::Reported => {
                "echo '{\"error\": \"Input signal length=0 is too small\"}'".to_string()
            }
        };

        format!(
            r#"LOG='{log}'
case "$1" in
  -c)
    case "$2" in
      *"import demucs"*)
        echo capability >> "$LOG"
        {capability}
        ;;
      *rhythm_complexity*)
        echo probe >> "$LOG"
        {probe}
        ;;
      *chord_templates*)
        echo chord >> "$LOG"
        {chord}
        ;;
      *)
        echo unknown >> "$LOG"
        exit 99
        ;;
    esac
    ;;
  -m)
    echo separate >> "$LOG"
    out=""
    prev=""
    last=""
    for a in "$@"; do
      if [ "$prev" = "--out" ]; then out="$a"; fi
      prev="$a"
      last="$a"
    done
    name=$(basename "$last")
    dir="$out/htdemucs/${{name%.*}}"
    {separate}
    ;;
esac
exit 0
"#,
            log = log.display(),
        )
    }
}

/// Isolated root folder, fake tool chain and router
pub struct TestEnv {
    pub root: TempDir,
    pub config: ServiceConfig,
    pub log: PathBuf,
    pub shutdown: CancellationToken,
}

impl TestEnv {
    pub fn new(tools: FakeTools) -> Self {
        Self::with_config(tools, |_| {})
    }

    pub fn with_config(tools: FakeTools, adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let log = root.path().join("invocations.log");
        let script = root.path().join("fake_python.sh");
        std::fs::write(&script, tools.script(&log)).unwrap();

        let data = root.path().join("data");
        RootFolderInitializer::new(data.clone())
            .ensure_directory_exists()
            .unwrap();

        let mut config = ServiceConfig::for_root(data);
        config.toolchain.python = PathBuf::from("/bin/sh");
        config.toolchain.python_args = vec![script.to_string_lossy().into_owned()];
        adjust(&mut config);

        Self {
            root,
            config,
            log,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.config.clone(), self.shutdown.clone())
    }

    pub fn router(&self) -> Router {
        build_router(self.state())
    }

    /// One entry per fake tool invocation, in order
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Files left in the transient upload directory
    pub fn uploads_left(&self) -> Vec<PathBuf> {
        files_in(&self.config.uploads_dir)
    }

    pub fn analyzed_files(&self) -> Vec<PathBuf> {
        files_in(&self.config.analyzed_dir)
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default()
}

/// multipart/form-data request with a single file field
pub fn upload_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nignored\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(body: Body) -> Bytes {
    body.collect().await.expect("Should read body").to_bytes()
}

/// Extract JSON body from response
pub async fn extract_json(body: Body) -> Value {
    serde_json::from_slice(&body_bytes(body).await).expect("Should parse JSON")
}
