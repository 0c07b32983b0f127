use idverify_core::capability::Capability;
use idverify_core::face::{DecodedImage, EmbeddingError, FaceEmbedder, ImageDecoder};
use idverify_core::recognition::{RecognitionError, TextRecognizer};
use idverify_core::storage::{ArtifactStore, DiskStore, StorageError};
use idverify_core::types::{
    BoundingBox, Embedding, FaceDetection, LenientStage, StatusClass, Upload, VerificationRequest,
};
use idverify_core::verifier::{Verifier, VerifierConfig, INTERNAL_ERROR_MESSAGE};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const DECLARED: &str = "1234 5678 9012";
const CARD_TEXT: &str = "GOVERNMENT OF INDIA\nAsha Rao\nDOB: 01/01/1990\n1234 5678 9012\n";

#[derive(Clone)]
enum Ocr {
    Text(&'static str),
    Fail,
    Hang,
}

struct StubOcr {
    behavior: Ocr,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl TextRecognizer for StubOcr {
    async fn recognize(&self, image: &Path) -> Result<String, RecognitionError> {
        self.calls.lock().unwrap().push(image.to_path_buf());
        match &self.behavior {
            Ocr::Text(text) => Ok(text.to_string()),
            Ocr::Fail => Err(RecognitionError::Failed {
                path: image.to_path_buf(),
                message: "engine crashed".into(),
            }),
            Ocr::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }
    }
}

#[derive(Clone, Copy)]
enum FaceFault {
    EngineGone,
    BadTensor,
    Hang,
}

/// Returns the faces registered for the upload whose name the staged path ends with.
struct StubFaces {
    faces: Vec<(&'static str, Vec<FaceDetection>)>,
    fault: Option<FaceFault>,
    calls: Arc<Mutex<usize>>,
}

impl FaceEmbedder for StubFaces {
    async fn detect_faces(&self, image: DecodedImage) -> Result<Vec<FaceDetection>, EmbeddingError> {
        *self.calls.lock().unwrap() += 1;
        match self.fault {
            Some(FaceFault::EngineGone) => {
                return Err(EmbeddingError::Unavailable("engine thread exited".into()))
            }
            Some(FaceFault::BadTensor) => {
                return Err(EmbeddingError::Inference("unexpected output shape".into()))
            }
            Some(FaceFault::Hang) => tokio::time::sleep(Duration::from_secs(30)).await,
            None => {}
        }
        let name = image
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .faces
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, faces)| faces.clone())
            .unwrap_or_default())
    }
}

struct BlankDecoder;

impl ImageDecoder for BlankDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, EmbeddingError> {
        Ok(DecodedImage {
            source: path.to_path_buf(),
            pixels: RgbImage::new(8, 8),
        })
    }
}

fn face(descriptor: Vec<f32>) -> FaceDetection {
    FaceDetection {
        bounding_box: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 40.0,
            height: 40.0,
            confidence: 0.95,
            landmarks: None,
        },
        descriptor: Embedding::new(descriptor),
    }
}

fn matching_faces() -> Vec<(&'static str, Vec<FaceDetection>)> {
    vec![
        ("card_id.png", vec![face(vec![0.0, 0.0])]),
        ("me_live.jpg", vec![face(vec![0.3, 0.0])]),
    ]
}

fn request(name: &str, id: &str, files: &[&str]) -> VerificationRequest {
    VerificationRequest {
        full_name: name.to_string(),
        govt_id_number: id.to_string(),
        uploads: files.iter().map(|f| Upload::new(*f, vec![0u8; 16])).collect(),
    }
}

struct Harness {
    verifier: Verifier<StubOcr, StubFaces, BlankDecoder, DiskStore>,
    ocr_calls: Arc<Mutex<Vec<PathBuf>>>,
    face_calls: Arc<Mutex<usize>>,
    upload_dir: PathBuf,
    _tmp: TempDir,
}

impl Harness {
    fn new(ocr: Ocr, faces: Vec<(&'static str, Vec<FaceDetection>)>) -> Self {
        Self::with_config(ocr, faces, VerifierConfig::default())
    }

    fn with_config(
        ocr: Ocr,
        faces: Vec<(&'static str, Vec<FaceDetection>)>,
        config: VerifierConfig,
    ) -> Self {
        Self::with_face_fault(ocr, faces, None, config)
    }

    fn with_face_fault(
        ocr: Ocr,
        faces: Vec<(&'static str, Vec<FaceDetection>)>,
        fault: Option<FaceFault>,
        config: VerifierConfig,
    ) -> Self {
        let ocr_calls = Arc::new(Mutex::new(Vec::new()));
        let face_calls = Arc::new(Mutex::new(0));
        let recognizer = Capability::ready(
            "text-recognition",
            StubOcr {
                behavior: ocr,
                calls: Arc::clone(&ocr_calls),
            },
        );
        let embedder = Capability::ready(
            "face-embedding",
            StubFaces {
                faces,
                fault,
                calls: Arc::clone(&face_calls),
            },
        );
        Self::assemble(recognizer, embedder, config, ocr_calls, face_calls)
    }

    fn assemble(
        recognizer: Capability<StubOcr>,
        embedder: Capability<StubFaces>,
        config: VerifierConfig,
        ocr_calls: Arc<Mutex<Vec<PathBuf>>>,
        face_calls: Arc<Mutex<usize>>,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let upload_dir = tmp.path().join("uploads");
        let store = DiskStore::new(&upload_dir).unwrap();
        Self {
            verifier: Verifier::new(
                config,
                Arc::new(recognizer),
                Arc::new(embedder),
                BlankDecoder,
                store,
            ),
            ocr_calls,
            face_calls,
            upload_dir,
            _tmp: tmp,
        }
    }

    fn leftover_uploads(&self) -> usize {
        std::fs::read_dir(&self.upload_dir).unwrap().count()
    }
}

#[tokio::test]
async fn test_matching_id_and_face_succeeds() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::Ok);
    assert!(outcome.response.success);
    assert_eq!(
        outcome.response.message,
        "Identity verification successful! Face similarity: 70.0%"
    );
    let details = outcome.response.details.unwrap();
    assert_eq!(details.name_provided, "Asha Rao");
    assert!(details.id_format_valid);
    assert_eq!(details.documents_received, 2);
    assert_eq!(details.ocr_extracted_id, "123456789012");
    assert!(details.ocr_matched);
    assert_eq!(details.face_match_score, Some(0.3));
    assert_eq!(details.face_match_passed, Some(true));
    assert!(details.lenient_stages.is_empty());

    // OCR only ever sees the ID document.
    let ocr_calls = h.ocr_calls.lock().unwrap().clone();
    assert_eq!(ocr_calls.len(), 1);
    assert!(ocr_calls[0].to_string_lossy().ends_with("card_id.png"));
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_id_mismatch_fails() {
    let h = Harness::new(Ocr::Text("Aadhaar\n9999 8888 7777\n"), matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::ClientError);
    assert!(!outcome.response.success);
    assert_eq!(outcome.response.message, "Verification failed: Aadhaar number mismatch");
    let details = outcome.response.details.unwrap();
    assert_eq!(details.ocr_extracted_id, "999988887777");
    assert!(!details.ocr_matched);
    assert_eq!(details.face_match_passed, Some(true));
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_both_stages_fail() {
    let faces = vec![
        ("card_id.png", vec![face(vec![0.0, 0.0])]),
        ("me_live.jpg", vec![face(vec![0.9, 0.0])]),
    ];
    let h = Harness::new(Ocr::Text("9999 8888 7777"), faces);
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(
        outcome.response.message,
        "Verification failed: Aadhaar number mismatch, Face does not match"
    );
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_score, Some(0.9));
    assert_eq!(details.face_match_passed, Some(false));
}

#[tokio::test]
async fn test_invalid_format_skips_collaborators() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", "12345", &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::ClientError);
    assert_eq!(outcome.response.message, "Invalid Aadhaar format. Must be 12 digits.");
    let details = outcome.response.details.unwrap();
    assert!(!details.id_format_valid);
    assert_eq!(details.ocr_extracted_id, "Not found");
    assert!(h.ocr_calls.lock().unwrap().is_empty());
    assert_eq!(*h.face_calls.lock().unwrap(), 0);
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_without_live_capture_only_id_decides() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", "123456789012", &["card_id.png"]))
        .await;

    assert!(outcome.response.success);
    assert_eq!(outcome.response.message, "Identity verification successful!");
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_score, None);
    assert_eq!(details.face_match_passed, None);
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
    assert_eq!(*h.face_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_first_upload_is_id_document_without_marker() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), vec![]);
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["front.png", "back.png"]))
        .await;

    assert!(outcome.response.success);
    let ocr_calls = h.ocr_calls.lock().unwrap().clone();
    assert!(ocr_calls[0].to_string_lossy().ends_with("front.png"));
}

#[tokio::test]
async fn test_ocr_failure_passes_leniently() {
    let h = Harness::new(Ocr::Fail, matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::Ok);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.ocr_extracted_id, "Not found");
    assert!(!details.ocr_matched);
    assert_eq!(details.lenient_stages, vec![LenientStage::Ocr]);
}

#[tokio::test]
async fn test_text_without_number_passes_leniently() {
    let h = Harness::new(Ocr::Text("blurry card, no digits"), matching_faces());
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.ocr_extracted_id, "Not found");
    assert_eq!(details.lenient_stages, vec![LenientStage::Ocr]);
}

#[tokio::test]
async fn test_collaborator_timeout_passes_leniently() {
    let config = VerifierConfig {
        collaborator_timeout: Some(Duration::from_millis(50)),
        ..VerifierConfig::default()
    };
    let h = Harness::with_config(Ocr::Hang, matching_faces(), config);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.verifier
            .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"])),
    )
    .await
    .expect("timeout should bound the request");

    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.lenient_stages, vec![LenientStage::Ocr]);
    assert_eq!(details.face_match_passed, Some(true));
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_face_embedding_unavailable_passes_leniently() {
    let ocr_calls = Arc::new(Mutex::new(Vec::new()));
    let recognizer = Capability::ready(
        "text-recognition",
        StubOcr {
            behavior: Ocr::Text(CARD_TEXT),
            calls: Arc::clone(&ocr_calls),
        },
    );
    let embedder: Capability<StubFaces> = Capability::failed("face-embedding", "models missing");
    let h = Harness::assemble(
        recognizer,
        embedder,
        VerifierConfig::default(),
        ocr_calls,
        Arc::new(Mutex::new(0)),
    );

    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;
    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_passed, None);
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
}

#[tokio::test]
async fn test_no_face_in_document_passes_leniently() {
    let faces = vec![("me_live.jpg", vec![face(vec![0.0, 0.0])])];
    let h = Harness::new(Ocr::Text(CARD_TEXT), faces);
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert!(outcome.response.success);
    assert_eq!(outcome.response.message, "Identity verification successful!");
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_score, None);
    assert_eq!(details.face_match_passed, Some(false));
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
}

#[tokio::test]
async fn test_face_engine_error_passes_leniently() {
    let h = Harness::with_face_fault(
        Ocr::Text(CARD_TEXT),
        matching_faces(),
        Some(FaceFault::EngineGone),
        VerifierConfig::default(),
    );
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::Ok);
    assert!(outcome.response.success);
    assert_eq!(outcome.response.message, "Identity verification successful!");
    let details = outcome.response.details.unwrap();
    assert!(details.ocr_matched);
    assert_eq!(details.face_match_score, None);
    assert_eq!(details.face_match_passed, None);
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_face_inference_failure_counts_as_no_face() {
    let h = Harness::with_face_fault(
        Ocr::Text(CARD_TEXT),
        matching_faces(),
        Some(FaceFault::BadTensor),
        VerifierConfig::default(),
    );
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_score, None);
    assert_eq!(details.face_match_passed, Some(false));
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
}

#[tokio::test]
async fn test_descriptor_length_mismatch_passes_leniently() {
    let faces = vec![
        ("card_id.png", vec![face(vec![0.0; 4])]),
        ("me_live.jpg", vec![face(vec![0.0; 8])]),
    ];
    let h = Harness::new(Ocr::Text(CARD_TEXT), faces);
    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert_eq!(details.face_match_passed, None);
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
}

#[tokio::test]
async fn test_face_embedding_timeout_passes_leniently() {
    let config = VerifierConfig {
        collaborator_timeout: Some(Duration::from_millis(50)),
        ..VerifierConfig::default()
    };
    let h = Harness::with_face_fault(
        Ocr::Text(CARD_TEXT),
        matching_faces(),
        Some(FaceFault::Hang),
        config,
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.verifier
            .handle(request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"])),
    )
    .await
    .expect("timeout should bound the face stage");

    assert!(outcome.response.success);
    let details = outcome.response.details.unwrap();
    assert!(details.ocr_matched);
    assert_eq!(details.face_match_passed, None);
    assert_eq!(details.lenient_stages, vec![LenientStage::Face]);
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_missing_fields_rejected_and_cleaned_up() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let outcome = h
        .verifier
        .handle(request("", DECLARED, &["card_id.png", "me_live.jpg"]))
        .await;

    assert_eq!(outcome.status, StatusClass::ClientError);
    assert_eq!(outcome.response.message, "Full name and government ID are required");
    assert!(outcome.response.details.is_none());
    assert!(outcome.decision.is_none());
    assert_eq!(h.leftover_uploads(), 0);

    let outcome = h.verifier.handle(request("Asha Rao", "", &["card_id.png"])).await;
    assert_eq!(outcome.response.message, "Full name and government ID are required");
}

#[tokio::test]
async fn test_no_documents_rejected() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let outcome = h.verifier.handle(request("Asha Rao", DECLARED, &[])).await;
    assert_eq!(outcome.status, StatusClass::ClientError);
    assert_eq!(outcome.response.message, "At least one document is required");
    assert!(outcome.response.details.is_none());
}

#[tokio::test]
async fn test_upload_limits() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());

    let six = ["a.png", "b.png", "c.png", "d.png", "e.png", "f.png"];
    let outcome = h.verifier.handle(request("Asha Rao", DECLARED, &six)).await;
    assert_eq!(outcome.status, StatusClass::ClientError);
    assert!(outcome.response.message.starts_with("Too many files"));

    let outcome = h
        .verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png", "notes.txt"]))
        .await;
    assert_eq!(outcome.status, StatusClass::ClientError);
    assert!(outcome.response.message.contains("notes.txt"));

    let mut big = request("Asha Rao", DECLARED, &["card_id.png"]);
    big.uploads[0].bytes = vec![0u8; 10 * 1024 * 1024 + 1];
    let outcome = h.verifier.handle(big).await;
    assert!(outcome.response.message.starts_with("File too large"));

    assert!(h.ocr_calls.lock().unwrap().is_empty());
    assert_eq!(h.leftover_uploads(), 0);
}

#[tokio::test]
async fn test_repeated_request_gives_same_response() {
    let h = Harness::new(Ocr::Text(CARD_TEXT), matching_faces());
    let req = request("Asha Rao", DECLARED, &["card_id.png", "me_live.jpg"]);
    let first = h.verifier.handle(req.clone()).await;
    let second = h.verifier.handle(req).await;
    assert_eq!(first.response, second.response);
    assert_eq!(first.status, second.status);
}

struct BrokenStore;

impl ArtifactStore for BrokenStore {
    fn save(&self, upload: &Upload) -> Result<PathBuf, StorageError> {
        Err(StorageError::Write {
            path: PathBuf::from(&upload.original_name),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn delete(&self, _path: &Path) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_storage_failure_is_generic_server_error() {
    let verifier = Verifier::new(
        VerifierConfig::default(),
        Arc::new(Capability::ready(
            "text-recognition",
            StubOcr {
                behavior: Ocr::Text(CARD_TEXT),
                calls: Arc::new(Mutex::new(Vec::new())),
            },
        )),
        Arc::new(Capability::ready(
            "face-embedding",
            StubFaces {
                faces: matching_faces(),
                fault: None,
                calls: Arc::new(Mutex::new(0)),
            },
        )),
        BlankDecoder,
        BrokenStore,
    );

    let outcome = verifier
        .handle(request("Asha Rao", DECLARED, &["card_id.png"]))
        .await;
    assert_eq!(outcome.status, StatusClass::ServerError);
    assert_eq!(outcome.response.message, INTERNAL_ERROR_MESSAGE);
    assert!(outcome.response.details.is_none());
    assert!(!outcome.response.message.contains("read-only"));
}
