use crate::engine::EngineHandle;
use idverify_core::verifier::server_error;
use idverify_core::{
    DiskStore, FsImageDecoder, TesseractCli, Upload, VerificationOutcome, VerificationRequest,
    Verifier,
};
use std::sync::Arc;
use zbus::interface;

pub type DaemonVerifier = Verifier<TesseractCli, EngineHandle, FsImageDecoder, DiskStore>;

/// D-Bus interface for the identity verification daemon.
///
/// Bus name: io.idverify.Verifier1
/// Object path: /io/idverify/Verifier1
pub struct VerifierService {
    verifier: Arc<DaemonVerifier>,
}

impl VerifierService {
    pub fn new(verifier: Arc<DaemonVerifier>) -> Self {
        Self { verifier }
    }
}

#[interface(name = "io.idverify.Verifier1")]
impl VerifierService {
    /// Verify a declared identity against uploaded document images.
    ///
    /// `documents` is a list of (file name, image bytes). Returns the status
    /// class ("ok", "client_error", "server_error") and the JSON response.
    #[zbus(out_args("status", "response"))]
    async fn verify(
        &self,
        full_name: String,
        govt_id_number: String,
        documents: Vec<(String, Vec<u8>)>,
    ) -> zbus::fdo::Result<(String, String)> {
        tracing::info!(documents = documents.len(), "verify requested");
        let request = build_request(full_name, govt_id_number, documents);

        // Run on its own task so a panic inside the pipeline becomes a server error.
        let verifier = Arc::clone(&self.verifier);
        let outcome = match tokio::spawn(async move { verifier.handle(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "verification task aborted");
                server_error()
            }
        };
        encode_outcome(&outcome)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.verifier.status();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "service": "identity-verification",
            "text_recognition": status.text_recognition.as_str(),
            "face_embedding": status.face_embedding.as_str(),
        })
        .to_string())
    }
}

fn build_request(
    full_name: String,
    govt_id_number: String,
    documents: Vec<(String, Vec<u8>)>,
) -> VerificationRequest {
    VerificationRequest {
        full_name,
        govt_id_number,
        uploads: documents
            .into_iter()
            .map(|(name, bytes)| Upload::new(name, bytes))
            .collect(),
    }
}

fn encode_outcome(outcome: &VerificationOutcome) -> zbus::fdo::Result<(String, String)> {
    let body = serde_json::to_string(&outcome.response)
        .map_err(|e| zbus::fdo::Error::Failed(format!("encoding response: {e}")))?;
    Ok((outcome.status.as_str().to_string(), body))
}
