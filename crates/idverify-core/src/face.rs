//! Face comparison between the ID document photo and the live capture.
//!
//! Image decoding and face embedding are injected collaborators: the comparator
//! only picks the most prominent face per image and measures descriptor
//! distance.

use crate::types::{FaceDetection, FaceMatchResult};
use image::RgbImage;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default Euclidean distance below which two faces are the same person.
pub const DEFAULT_FACE_THRESHOLD: f32 = 0.6;

const NO_FACE_DOCUMENT: &str = "No face detected in first image (Aadhaar)";
const NO_FACE_LIVE: &str = "No face detected in second image (Live capture)";

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("face embedding unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face inference failed: {0}")]
    Inference(String),
    #[error("descriptor length mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("face embedding timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl EmbeddingError {
    /// Failures confined to one image; the comparator reports them as "no face".
    pub fn is_image_specific(&self) -> bool {
        matches!(self, EmbeddingError::Decode { .. } | EmbeddingError::Inference(_))
    }
}

/// A decoded RGB image together with where it came from.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub source: PathBuf,
    pub pixels: RgbImage,
}

/// Turns an image artifact into pixels the embedder can consume.
pub trait ImageDecoder: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> Result<DecodedImage, EmbeddingError>;
}

/// Decodes any format supported by the `image` crate from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageDecoder;

impl ImageDecoder for FsImageDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage, EmbeddingError> {
        let image = image::open(path).map_err(|source| EmbeddingError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(DecodedImage {
            source: path.to_path_buf(),
            pixels: image.to_rgb8(),
        })
    }
}

/// Detects faces and produces one descriptor per face.
pub trait FaceEmbedder: Send + Sync + 'static {
    fn detect_faces(
        &self,
        image: DecodedImage,
    ) -> impl Future<Output = Result<Vec<FaceDetection>, EmbeddingError>> + Send;
}

/// Keep the detection with the largest bounding box; earlier wins ties.
pub fn select_representative(detections: Vec<FaceDetection>) -> Option<FaceDetection> {
    detections.into_iter().fold(None, |best, current| match best {
        Some(prev) if current.area() <= prev.area() => Some(prev),
        _ => Some(current),
    })
}

/// Strict: a distance equal to the threshold is not a match.
pub fn is_match(distance: f32, threshold: f32) -> bool {
    distance < threshold
}

pub struct FaceComparator<D> {
    decoder: D,
}

impl<D: ImageDecoder> FaceComparator<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// Most prominent face in the image, or `None` when no face is found or
    /// the image could not be decoded or run through the embedder.
    pub async fn representative_face<E: FaceEmbedder>(
        &self,
        embedder: &E,
        path: &Path,
    ) -> Result<Option<FaceDetection>, EmbeddingError> {
        match self.detect_representative(embedder, path).await {
            Err(e) if e.is_image_specific() => {
                tracing::warn!(path = %path.display(), error = %e, "face detection failed; treating as no face");
                Ok(None)
            }
            other => other,
        }
    }

    async fn detect_representative<E: FaceEmbedder>(
        &self,
        embedder: &E,
        path: &Path,
    ) -> Result<Option<FaceDetection>, EmbeddingError> {
        let image = self.decoder.decode(path)?;
        tracing::debug!(
            path = %path.display(),
            width = image.pixels.width(),
            height = image.pixels.height(),
            "detecting faces"
        );

        let detections = embedder.detect_faces(image).await?;
        let count = detections.len();
        let face = select_representative(detections);
        match &face {
            Some(f) => tracing::debug!(
                path = %path.display(),
                faces = count,
                confidence = f.confidence(),
                area = f.area(),
                "representative face selected"
            ),
            None => tracing::info!(path = %path.display(), "no face detected"),
        }
        Ok(face)
    }

    /// Compare the document face with the live-capture face.
    pub async fn compare<E: FaceEmbedder>(
        &self,
        embedder: &E,
        document: &Path,
        live: &Path,
        threshold: f32,
    ) -> Result<FaceMatchResult, EmbeddingError> {
        let document_face = self.representative_face(embedder, document).await?;
        let live_face = self.representative_face(embedder, live).await?;

        let (doc, live) = match (document_face, live_face) {
            (None, _) => return Ok(no_face(NO_FACE_DOCUMENT)),
            (_, None) => return Ok(no_face(NO_FACE_LIVE)),
            (Some(doc), Some(live)) => (doc, live),
        };

        let (left, right) = (doc.descriptor.dim(), live.descriptor.dim());
        if left != right {
            return Err(EmbeddingError::DimensionMismatch { left, right });
        }

        let distance = doc.descriptor.euclidean_distance(&live.descriptor);
        let matched = is_match(distance, threshold);
        tracing::info!(distance, threshold, matched, "face comparison");

        Ok(FaceMatchResult {
            distance: Some(distance),
            matched,
            confidence1: Some(doc.confidence()),
            confidence2: Some(live.confidence()),
            error: None,
        })
    }
}

fn no_face(message: &str) -> FaceMatchResult {
    FaceMatchResult {
        distance: None,
        matched: false,
        confidence1: None,
        confidence2: None,
        error: Some(message.to_string()),
    }
}
