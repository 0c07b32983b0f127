//! Model download for `idverify models fetch`.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Parse `FILE=HEX` for `--sha256`.
pub fn parse_checksum(arg: &str) -> Result<(String, String), String> {
    let (file, digest) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected FILE=SHA256, got `{arg}`"))?;
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{digest}` is not a hex SHA-256 digest"));
    }
    Ok((file.to_string(), digest.to_ascii_lowercase()))
}

pub fn model_url(base_url: &str, file: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), file)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Download `file` from `base_url` into `dir`. Returns the installed path and its digest.
pub async fn fetch_model(
    client: &reqwest::Client,
    base_url: &str,
    dir: &Path,
    file: &str,
    expected: Option<&str>,
) -> Result<(PathBuf, String)> {
    let url = model_url(base_url, file);
    tracing::info!(%url, "downloading model");

    let resp = client
        .get(&url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    if !resp.status().is_success() {
        bail!("HTTP {} from {}", resp.status(), url);
    }
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("reading body of {url}"))?;

    install(dir, file, &bytes, expected)
}

/// Write `bytes` to `dir/file` atomically, after checking the digest when one is given.
pub fn install(
    dir: &Path,
    file: &str,
    bytes: &[u8],
    expected: Option<&str>,
) -> Result<(PathBuf, String)> {
    let digest = sha256_hex(bytes);
    if let Some(expected) = expected {
        if !digest.eq_ignore_ascii_case(expected) {
            bail!("checksum mismatch for {file}: expected {expected}, got {digest}");
        }
    }

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    let path = dir.join(file);
    tmp.persist(&path)
        .with_context(|| format!("installing {}", path.display()))?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), sha256 = %digest, "model installed");
    Ok((path, digest))
}
