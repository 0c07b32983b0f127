use idverify_core::detector::{DetectorError, FaceDetector};
use idverify_core::recognizer::{FaceRecognizer, RecognizerError};
use idverify_core::{DecodedImage, EmbeddingError, FaceDetection, FaceEmbedder};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<FaceDetection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect every face in `image` and compute a descriptor for each.
    pub async fn detect(&self, image: RgbImage) -> Result<Vec<FaceDetection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl FaceEmbedder for EngineHandle {
    async fn detect_faces(&self, image: DecodedImage) -> Result<Vec<FaceDetection>, EmbeddingError> {
        self.detect(image.pixels).await.map_err(|e| match e {
            EngineError::ChannelClosed => {
                EmbeddingError::Unavailable("engine thread exited".into())
            }
            other => EmbeddingError::Inference(other.to_string()),
        })
    }
}

/// Load both ONNX models and run inference on a dedicated OS thread.
///
/// Blocks while the models load, so call it from a blocking context.
pub fn spawn_engine(scrfd_path: &Path, arcface_path: &Path) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = %arcface_path.display(), "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("idverify-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = run_detect(&mut detector, &mut recognizer, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_detect(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    image: &RgbImage,
) -> Result<Vec<FaceDetection>, EngineError> {
    let boxes = detector.detect(image)?;
    tracing::debug!(
        faces = boxes.len(),
        width = image.width(),
        height = image.height(),
        "faces detected"
    );

    let mut faces = Vec::with_capacity(boxes.len());
    for bounding_box in boxes {
        match recognizer.extract(image, &bounding_box) {
            Ok(descriptor) => faces.push(FaceDetection {
                bounding_box,
                descriptor,
            }),
            Err(RecognizerError::NoLandmarks) => {
                tracing::debug!(confidence = bounding_box.confidence, "face without landmarks skipped");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(faces)
}
