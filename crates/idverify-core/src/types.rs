use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// Callers must check that both embeddings have the same dimension;
    /// extra trailing values of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by the embedding collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub descriptor: Embedding,
}

impl FaceDetection {
    pub fn area(&self) -> f32 {
        self.bounding_box.area()
    }

    pub fn confidence(&self) -> f32 {
        self.bounding_box.confidence
    }
}

/// Outcome of comparing the representative faces of two images.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatchResult {
    /// Euclidean distance, `None` when either image had no face.
    pub distance: Option<f32>,
    pub matched: bool,
    pub confidence1: Option<f32>,
    pub confidence2: Option<f32>,
    pub error: Option<String>,
}

/// Role of an uploaded artifact, inferred from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRole {
    IdDocument,
    SupportingDocument,
    LiveCapture,
}

/// One uploaded image as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(original_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// Informational only; never matched against the document.
    pub full_name: String,
    pub govt_id_number: String,
    pub uploads: Vec<Upload>,
}

/// A stage that passed only because a collaborator could not give an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LenientStage {
    Ocr,
    Face,
}

/// Final verdict for one request. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationDecision {
    pub success: bool,
    pub message: String,
    pub id_format_valid: bool,
    pub extracted_id: Option<String>,
    pub id_matched: bool,
    pub face_distance: Option<f32>,
    pub face_matched: Option<bool>,
    pub lenient_stages: Vec<LenientStage>,
}

impl VerificationDecision {
    /// Face distance as reported to callers, rounded to 4 decimals.
    pub fn face_match_score(&self) -> Option<f64> {
        self.face_distance.map(|d| round4(d as f64))
    }

    pub fn to_response(&self, name_provided: &str, documents_received: usize) -> VerificationResponse {
        VerificationResponse {
            success: self.success,
            message: self.message.clone(),
            details: Some(VerificationDetails {
                name_provided: name_provided.to_string(),
                id_format_valid: self.id_format_valid,
                documents_received,
                ocr_extracted_id: self
                    .extracted_id
                    .clone()
                    .unwrap_or_else(|| NOT_FOUND.to_string()),
                ocr_matched: self.id_matched,
                face_match_score: self.face_match_score(),
                face_match_passed: self.face_matched,
                lenient_stages: self.lenient_stages.clone(),
            }),
        }
    }
}

pub const NOT_FOUND: &str = "Not found";

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDetails {
    pub name_provided: String,
    pub id_format_valid: bool,
    pub documents_received: usize,
    pub ocr_extracted_id: String,
    pub ocr_matched: bool,
    pub face_match_score: Option<f64>,
    pub face_match_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lenient_stages: Vec<LenientStage>,
}

/// Wire shape returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<VerificationDetails>,
}

impl VerificationResponse {
    pub fn bare(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }
}

/// Transport-agnostic status class of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Ok,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Ok => "ok",
            StatusClass::ClientError => "client_error",
            StatusClass::ServerError => "server_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub status: StatusClass,
    pub response: VerificationResponse,
    /// Present once the request got past field validation.
    pub decision: Option<VerificationDecision>,
}
