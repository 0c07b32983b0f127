//! idverify-core: identity verification from document photos and a live capture.
//!
//! The declared Aadhaar number is checked against text recognized from the ID
//! document, and the document photo is compared with the live capture using
//! SCRFD detection and ArcFace embeddings on ONNX Runtime.

pub mod alignment;
pub mod capability;
pub mod detector;
pub mod extractor;
pub mod face;
pub mod fusion;
pub mod matcher;
pub mod recognition;
pub mod recognizer;
pub mod storage;
pub mod types;
pub mod verifier;

pub use capability::{Capability, CapabilityState};
pub use face::{DecodedImage, EmbeddingError, FaceEmbedder, FsImageDecoder, ImageDecoder};
pub use matcher::IdMatchPolicy;
pub use recognition::{RecognitionError, TesseractCli, TextRecognizer};
pub use storage::{ArtifactStore, DiskStore};
pub use types::{
    BoundingBox, Embedding, FaceDetection, StatusClass, Upload, VerificationOutcome,
    VerificationRequest, VerificationResponse,
};
pub use verifier::{CollaboratorStatus, Verifier, VerifierConfig};

use std::path::PathBuf;

/// SCRFD detection model file name.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/idverify/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    model_dir_under(
        std::env::var("XDG_DATA_HOME").ok(),
        std::env::var("HOME").ok(),
    )
}

pub fn model_dir_under(xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    xdg_data_home
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(home.unwrap_or_else(|| "/tmp".into())).join(".local/share"))
        .join("idverify/models")
}
