//! Request orchestration.
//!
//! `verify` drives one request through upload validation, staging, field
//! validation and the format check, then runs the ID stage and the face stage
//! concurrently and fuses their verdicts. Staged uploads are removed when the
//! request finishes, whatever the outcome.

use crate::capability::{Capability, CapabilityState};
use crate::extractor::normalize_declared;
use crate::face::{EmbeddingError, FaceComparator, FaceEmbedder, ImageDecoder, DEFAULT_FACE_THRESHOLD};
use crate::fusion::{self, FaceStageOutcome, IdStageOutcome, Leniency, StageVerdict};
use crate::matcher::{match_id, IdMatchPolicy};
use crate::recognition::{RecognitionError, TextRecognizer};
use crate::storage::{ArtifactStore, StagedArtifacts, StorageError};
use crate::types::{
    StatusClass, Upload, VerificationOutcome, VerificationRequest, VerificationResponse,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

pub const MAX_UPLOADS: usize = 5;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error during verification";

/// Request problems reported back to the caller as client errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Full name and government ID are required")]
    MissingFields,
    #[error("At least one document is required")]
    NoDocuments,
    #[error("Too many files: at most {max} documents are accepted")]
    TooManyUploads { max: usize },
    #[error("File too large: {name} exceeds {max} bytes")]
    UploadTooLarge { name: String, max: usize },
    #[error("Only image files are allowed! Got: {name}")]
    NotAnImage { name: String },
}

/// Internal failures; the caller only ever sees `INTERNAL_ERROR_MESSAGE`.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("staging uploads failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub face_threshold: f32,
    pub id_policy: IdMatchPolicy,
    /// Upper bound on each collaborator call. `None` waits indefinitely.
    pub collaborator_timeout: Option<Duration>,
    pub max_upload_bytes: usize,
    pub max_uploads: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            face_threshold: DEFAULT_FACE_THRESHOLD,
            id_policy: IdMatchPolicy::default(),
            collaborator_timeout: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_uploads: MAX_UPLOADS,
        }
    }
}

/// Lifecycle of both collaborators, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollaboratorStatus {
    pub text_recognition: CapabilityState,
    pub face_embedding: CapabilityState,
}

pub struct Verifier<R, E, D, S> {
    config: VerifierConfig,
    recognizer: Arc<Capability<R>>,
    embedder: Arc<Capability<E>>,
    comparator: FaceComparator<D>,
    store: S,
}

impl<R, E, D, S> Verifier<R, E, D, S>
where
    R: TextRecognizer,
    E: FaceEmbedder,
    D: ImageDecoder,
    S: ArtifactStore,
{
    pub fn new(
        config: VerifierConfig,
        recognizer: Arc<Capability<R>>,
        embedder: Arc<Capability<E>>,
        decoder: D,
        store: S,
    ) -> Self {
        Self {
            config,
            recognizer,
            embedder,
            comparator: FaceComparator::new(decoder),
            store,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn status(&self) -> CollaboratorStatus {
        CollaboratorStatus {
            text_recognition: self.recognizer.state(),
            face_embedding: self.embedder.state(),
        }
    }

    /// Load both collaborators now rather than on the first request.
    pub async fn warm_up(&self) -> CollaboratorStatus {
        let (text_recognition, face_embedding) =
            tokio::join!(self.recognizer.warm_up(), self.embedder.warm_up());
        CollaboratorStatus {
            text_recognition,
            face_embedding,
        }
    }

    /// Like `verify`, with internal failures mapped to a generic server error.
    pub async fn handle(&self, request: VerificationRequest) -> VerificationOutcome {
        match self.verify(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "verification failed internally");
                server_error()
            }
        }
    }

    pub async fn verify(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerifyError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("verify", %request_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: VerificationRequest) -> Result<VerificationOutcome, VerifyError> {
        tracing::info!(
            name = %request.full_name,
            uploads = request.uploads.len(),
            "verification request"
        );

        if let Err(e) = self.check_uploads(&request.uploads) {
            tracing::info!(error = %e, "upload rejected");
            return Ok(client_error(e));
        }

        let staged = StagedArtifacts::stage(&self.store, &request.uploads)?;

        if request.full_name.is_empty() || request.govt_id_number.is_empty() {
            return Ok(client_error(ValidationError::MissingFields));
        }
        if staged.is_empty() {
            return Ok(client_error(ValidationError::NoDocuments));
        }

        let documents = staged.len();
        let Some(declared) = normalize_declared(&request.govt_id_number) else {
            tracing::info!("declared number is not 12 digits");
            let decision = fusion::format_rejection();
            return Ok(VerificationOutcome {
                status: StatusClass::ClientError,
                response: decision.to_response(&request.full_name, documents),
                decision: Some(decision),
            });
        };

        let document = staged.id_document().map(|a| a.path.as_path());
        let live = staged.live_capture().map(|a| a.path.as_path());

        let (id, face) = tokio::join!(
            self.id_stage(document, &declared),
            self.face_stage(document, live)
        );
        let decision = fusion::fuse(&id, &face);

        tracing::info!(
            success = decision.success,
            id_matched = decision.id_matched,
            face_distance = ?decision.face_distance,
            lenient = ?decision.lenient_stages,
            "verification decided"
        );

        Ok(VerificationOutcome {
            status: if decision.success {
                StatusClass::Ok
            } else {
                StatusClass::ClientError
            },
            response: decision.to_response(&request.full_name, documents),
            decision: Some(decision),
        })
    }

    fn check_uploads(&self, uploads: &[Upload]) -> Result<(), ValidationError> {
        if uploads.len() > self.config.max_uploads {
            return Err(ValidationError::TooManyUploads {
                max: self.config.max_uploads,
            });
        }
        for upload in uploads {
            if upload.bytes.len() > self.config.max_upload_bytes {
                return Err(ValidationError::UploadTooLarge {
                    name: upload.original_name.clone(),
                    max: self.config.max_upload_bytes,
                });
            }
            if !looks_like_image(upload) {
                return Err(ValidationError::NotAnImage {
                    name: upload.original_name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn bounded<T, Er>(
        &self,
        call: impl Future<Output = Result<T, Er>>,
        on_timeout: impl FnOnce(Duration) -> Er,
    ) -> Result<T, Er> {
        match self.config.collaborator_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout(limit)),
            },
            None => call.await,
        }
    }

    async fn id_stage(&self, document: Option<&Path>, declared: &str) -> IdStageOutcome {
        let Some(document) = document else {
            return IdStageOutcome::lenient(Leniency::Unavailable("no document".into()));
        };

        let recognizer = match self.recognizer.acquire().await {
            Ok(r) => r,
            Err(reason) => {
                tracing::warn!(%reason, "text recognition unavailable; id stage passes leniently");
                return IdStageOutcome::lenient(Leniency::Unavailable(reason.to_string()));
            }
        };

        let text = match self
            .bounded(recognizer.recognize(document), RecognitionError::Timeout)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "text recognition failed; id stage passes leniently");
                return IdStageOutcome::lenient(Leniency::CollaboratorError(e.to_string()));
            }
        };

        let result = match_id(&text, declared, &self.config.id_policy);
        let Some(candidate) = result.best_candidate.clone() else {
            tracing::warn!("no 12-digit number in document text; id stage passes leniently");
            return IdStageOutcome::lenient(Leniency::NoCandidate);
        };

        let accepted = result.accepted();
        tracing::info!(
            acceptance = ?result.acceptance,
            agreement = result.positional_digit_matches,
            accepted,
            "id match"
        );
        IdStageOutcome {
            verdict: if accepted {
                StageVerdict::Passed
            } else {
                StageVerdict::Failed
            },
            extracted_id: Some(candidate),
            id_matched: accepted,
        }
    }

    async fn face_stage(&self, document: Option<&Path>, live: Option<&Path>) -> FaceStageOutcome {
        let (Some(document), Some(live)) = (document, live) else {
            tracing::info!("no live capture; face stage skipped");
            return FaceStageOutcome::lenient(Leniency::NoLiveCapture);
        };

        let embedder = match self.embedder.acquire().await {
            Ok(e) => e,
            Err(reason) => {
                tracing::warn!(%reason, "face embedding unavailable; face stage passes leniently");
                return FaceStageOutcome::lenient(Leniency::Unavailable(reason.to_string()));
            }
        };

        let compared = self
            .bounded(
                self.comparator
                    .compare(embedder.as_ref(), document, live, self.config.face_threshold),
                EmbeddingError::Timeout,
            )
            .await;

        match compared {
            Ok(result) => match result.error {
                Some(message) => {
                    tracing::warn!(%message, "face stage passes leniently");
                    FaceStageOutcome {
                        verdict: StageVerdict::Lenient(Leniency::NoFace(message)),
                        distance: None,
                        matched: Some(false),
                    }
                }
                None => FaceStageOutcome {
                    verdict: if result.matched {
                        StageVerdict::Passed
                    } else {
                        StageVerdict::Failed
                    },
                    distance: result.distance,
                    matched: Some(result.matched),
                },
            },
            Err(e) => {
                tracing::warn!(error = %e, "face comparison failed; face stage passes leniently");
                FaceStageOutcome::lenient(Leniency::CollaboratorError(e.to_string()))
            }
        }
    }
}

/// Accept by file extension, or by content when the name carries no usable one.
fn looks_like_image(upload: &Upload) -> bool {
    let by_name = Path::new(&upload.original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| e.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);
    by_name || image::guess_format(&upload.bytes).is_ok()
}

fn client_error(e: ValidationError) -> VerificationOutcome {
    VerificationOutcome {
        status: StatusClass::ClientError,
        response: VerificationResponse::bare(e.to_string()),
        decision: None,
    }
}

pub fn server_error() -> VerificationOutcome {
    VerificationOutcome {
        status: StatusClass::ServerError,
        response: VerificationResponse::bare(INTERNAL_ERROR_MESSAGE),
        decision: None,
    }
}
