use anyhow::{Context, Result};
use idverify_core::capability::BoxError;
use idverify_core::{Capability, DiskStore, FsImageDecoder, TesseractCli, Verifier};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        upload_dir = %config.upload_dir.display(),
        face_threshold = config.face_threshold,
        timeout_secs = config.collaborator_timeout_secs,
        "idverifyd starting"
    );

    let store = DiskStore::new(&config.upload_dir).context("preparing upload directory")?;

    let ocr = TesseractCli::new(&config.tesseract_bin, &config.tesseract_lang);
    let recognizer = Arc::new(Capability::lazy("text-recognition", move || async move {
        ocr.probe().await?;
        Ok::<_, BoxError>(ocr)
    }));

    let (scrfd, arcface) = (config.scrfd_model_path(), config.arcface_model_path());
    let embedder = Arc::new(Capability::lazy("face-embedding", move || async move {
        let handle =
            tokio::task::spawn_blocking(move || engine::spawn_engine(&scrfd, &arcface)).await??;
        Ok::<_, BoxError>(handle)
    }));

    let verifier = Arc::new(Verifier::new(
        config.verifier_config(),
        recognizer,
        embedder,
        FsImageDecoder,
        store,
    ));

    // Requests arriving before warm-up finishes wait for it; a failed load
    // leaves the daemon serving with that stage lenient.
    {
        let verifier = Arc::clone(&verifier);
        tokio::spawn(async move {
            let status = verifier.warm_up().await;
            tracing::info!(
                text_recognition = %status.text_recognition,
                face_embedding = %status.face_embedding,
                "collaborators initialized"
            );
        });
    }

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, dbus_interface::VerifierService::new(verifier))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "idverifyd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("idverifyd shutting down");

    Ok(())
}
