use idverify_core::matcher::IdMatchPolicy;
use idverify_core::{VerifierConfig, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const BUS_NAME: &str = "io.idverify.Verifier1";
pub const OBJECT_PATH: &str = "/io/idverify/Verifier1";

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where uploads are staged while a request runs.
    pub upload_dir: PathBuf,
    /// Euclidean distance below which two faces match.
    pub face_threshold: f32,
    /// Per-collaborator timeout in seconds; 0 disables it.
    pub collaborator_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub tesseract_bin: String,
    pub tesseract_lang: String,
    pub selection_min_digits: u8,
    pub acceptance_min_digits: u8,
    pub substring_len: usize,
    pub substring_offsets: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `IDVERIFY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = IdMatchPolicy::default();

        let model_dir = lookup("IDVERIFY_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| idverify_core::model_dir_under(lookup("XDG_DATA_HOME"), lookup("HOME")));
        let upload_dir = lookup("IDVERIFY_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("idverify-uploads"));

        Self {
            model_dir,
            upload_dir,
            face_threshold: parse(&lookup, "IDVERIFY_FACE_THRESHOLD")
                .unwrap_or(idverify_core::face::DEFAULT_FACE_THRESHOLD),
            collaborator_timeout_secs: parse(&lookup, "IDVERIFY_COLLABORATOR_TIMEOUT_SECS").unwrap_or(0),
            max_upload_bytes: parse(&lookup, "IDVERIFY_MAX_UPLOAD_BYTES")
                .unwrap_or(idverify_core::verifier::DEFAULT_MAX_UPLOAD_BYTES),
            tesseract_bin: lookup("IDVERIFY_TESSERACT_BIN").unwrap_or_else(|| "tesseract".into()),
            tesseract_lang: lookup("IDVERIFY_TESSERACT_LANG").unwrap_or_else(|| "eng".into()),
            selection_min_digits: parse(&lookup, "IDVERIFY_SELECTION_MIN_DIGITS")
                .unwrap_or(defaults.selection_min_agreement),
            acceptance_min_digits: parse(&lookup, "IDVERIFY_ACCEPTANCE_MIN_DIGITS")
                .unwrap_or(defaults.acceptance_min_agreement),
            substring_len: parse(&lookup, "IDVERIFY_SUBSTRING_LEN").unwrap_or(defaults.substring_len),
            substring_offsets: parse(&lookup, "IDVERIFY_SUBSTRING_OFFSETS")
                .unwrap_or(defaults.substring_offsets),
            bus: match lookup("IDVERIFY_BUS").as_deref() {
                Some("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            face_threshold: self.face_threshold,
            id_policy: IdMatchPolicy {
                selection_min_agreement: self.selection_min_digits,
                acceptance_min_agreement: self.acceptance_min_digits,
                substring_len: self.substring_len,
                substring_offsets: self.substring_offsets,
            },
            collaborator_timeout: (self.collaborator_timeout_secs > 0)
                .then(|| Duration::from_secs(self.collaborator_timeout_secs)),
            max_upload_bytes: self.max_upload_bytes,
            ..VerifierConfig::default()
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
