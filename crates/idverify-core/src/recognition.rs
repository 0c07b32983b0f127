//! Text recognition collaborator.
//!
//! The core only needs `recognize(image) -> text`. `TesseractCli` drives the
//! `tesseract` binary as a child process and reads the text from stdout.

use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("text recognition unavailable: {0}")]
    Unavailable(String),
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("recognition failed for {path}: {message}")]
    Failed { path: PathBuf, message: String },
    #[error("recognition timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Anything that can turn an image file into raw text.
pub trait TextRecognizer: Send + Sync + 'static {
    fn recognize(
        &self,
        image: &Path,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send;
}

/// Tesseract invoked through its command-line interface.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    lang: String,
}

impl TesseractCli {
    pub fn new(binary: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            lang: lang.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check that the binary runs, returning its reported version line.
    pub async fn probe(&self) -> Result<String, RecognitionError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|source| RecognitionError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RecognitionError::Unavailable(format!(
                "{} --version exited with {}",
                self.binary, output.status
            )));
        }

        // Older releases print the version on stderr.
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let version = String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        tracing::info!(binary = %self.binary, %version, "tesseract available");
        Ok(version)
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &Path) -> Result<String, RecognitionError> {
        tracing::debug!(path = %image.display(), lang = %self.lang, "running tesseract");
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RecognitionError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Failed {
                path: image.to_path_buf(),
                message: stderr.trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::debug!(
            chars = text.len(),
            preview = %text.chars().take(200).collect::<String>(),
            "tesseract output"
        );
        Ok(text)
    }
}
