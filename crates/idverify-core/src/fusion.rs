//! Fusion of the ID stage and face stage into one verification decision.

use crate::types::{LenientStage, VerificationDecision};

pub const SUCCESS_MESSAGE: &str = "Identity verification successful!";
pub const FAILURE_PREFIX: &str = "Verification failed: ";
pub const ID_MISMATCH: &str = "Aadhaar number mismatch";
pub const FACE_MISMATCH: &str = "Face does not match";
pub const INVALID_FORMAT: &str = "Invalid Aadhaar format. Must be 12 digits.";

/// Why a stage passed without actually being evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leniency {
    /// The collaborator was unavailable or never became ready.
    Unavailable(String),
    /// The collaborator was called and failed or timed out.
    CollaboratorError(String),
    /// OCR produced no 12-digit candidate.
    NoCandidate,
    /// No live capture was supplied.
    NoLiveCapture,
    /// One of the images had no detectable face.
    NoFace(String),
}

/// Pass/fail of one stage, with the reason when it passed leniently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageVerdict {
    Passed,
    Failed,
    Lenient(Leniency),
}

impl StageVerdict {
    pub fn passed(&self) -> bool {
        !matches!(self, StageVerdict::Failed)
    }

    pub fn is_lenient(&self) -> bool {
        matches!(self, StageVerdict::Lenient(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdStageOutcome {
    pub verdict: StageVerdict,
    pub extracted_id: Option<String>,
    pub id_matched: bool,
}

impl IdStageOutcome {
    pub fn lenient(reason: Leniency) -> Self {
        Self {
            verdict: StageVerdict::Lenient(reason),
            extracted_id: None,
            id_matched: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceStageOutcome {
    pub verdict: StageVerdict,
    pub distance: Option<f32>,
    pub matched: Option<bool>,
}

impl FaceStageOutcome {
    pub fn lenient(reason: Leniency) -> Self {
        Self {
            verdict: StageVerdict::Lenient(reason),
            distance: None,
            matched: None,
        }
    }
}

/// Decision for a declared number that is not 12 digits. No stage runs.
pub fn format_rejection() -> VerificationDecision {
    VerificationDecision {
        success: false,
        message: INVALID_FORMAT.to_string(),
        id_format_valid: false,
        extracted_id: None,
        id_matched: false,
        face_distance: None,
        face_matched: None,
        lenient_stages: Vec::new(),
    }
}

/// Success iff both stages passed, leniency included.
pub fn fuse(id: &IdStageOutcome, face: &FaceStageOutcome) -> VerificationDecision {
    let success = id.verdict.passed() && face.verdict.passed();

    let mut decision = VerificationDecision {
        success,
        message: String::new(),
        id_format_valid: true,
        extracted_id: id.extracted_id.clone(),
        id_matched: id.id_matched,
        face_distance: face.distance,
        face_matched: face.matched,
        lenient_stages: Vec::new(),
    };
    if id.verdict.is_lenient() {
        decision.lenient_stages.push(LenientStage::Ocr);
    }
    if face.verdict.is_lenient() {
        decision.lenient_stages.push(LenientStage::Face);
    }

    decision.message = if success {
        match decision.face_match_score() {
            Some(score) => format!(
                "{SUCCESS_MESSAGE} Face similarity: {:.1}%",
                (1.0 - score) * 100.0
            ),
            None => SUCCESS_MESSAGE.to_string(),
        }
    } else {
        let mut failures = Vec::new();
        if !id.verdict.passed() {
            failures.push(ID_MISMATCH);
        }
        if !face.verdict.passed() {
            failures.push(FACE_MISMATCH);
        }
        format!("{FAILURE_PREFIX}{}", failures.join(", "))
    };

    decision
}
