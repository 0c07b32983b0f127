use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idverify_core::extractor::extract_candidates;
use idverify_core::matcher::{match_id, IdMatchPolicy};
use idverify_core::{TesseractCli, TextRecognizer, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod fetch;

#[derive(Parser)]
#[command(name = "idverify", about = "Identity verification CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit documents for verification
    Verify {
        /// Full name of the person
        #[arg(short, long)]
        name: String,
        /// Declared 12-digit Aadhaar number
        #[arg(short, long)]
        id: String,
        /// Document images; name the ID card `*_id.*` and the selfie `*_live.*`
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Run local OCR on an image and show the ID candidates found
    Scan {
        image: PathBuf,
        /// Also match the candidates against this declared number
        #[arg(short, long)]
        declared: Option<String>,
        #[arg(long, default_value = "tesseract")]
        tesseract: String,
        #[arg(long, default_value = "eng")]
        lang: String,
    },
    /// Check that the face models are installed, or fetch them
    Models {
        /// Model directory (default: $XDG_DATA_HOME/idverify/models)
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(subcommand)]
        action: Option<ModelsAction>,
    },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// Download the SCRFD and ArcFace models from a mirror
    Fetch {
        /// URL the model files are served under, e.g. https://host/buffalo_l
        #[arg(long)]
        base_url: String,
        /// Expected digest as FILE=SHA256; may be repeated
        #[arg(long = "sha256", value_parser = fetch::parse_checksum)]
        checksums: Vec<(String, String)>,
        /// Replace files that are already installed
        #[arg(long)]
        force: bool,
    },
}

#[zbus::proxy(
    interface = "io.idverify.Verifier1",
    default_service = "io.idverify.Verifier1",
    default_path = "/io/idverify/Verifier1"
)]
trait Verifier1 {
    fn verify(
        &self,
        full_name: &str,
        govt_id_number: &str,
        documents: Vec<(String, Vec<u8>)>,
    ) -> zbus::Result<(String, String)>;

    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { name, id, files } => {
            let documents = read_documents(&files)?;
            let proxy = connect(cli.system).await?;
            let (status, body) = proxy.verify(&name, &id, documents).await?;
            println!("{}", pretty(&body));
            Ok(ExitCode::from(exit_code_for(&status)))
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let body = proxy.status().await?;
            println!("{}", pretty(&body));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan {
            image,
            declared,
            tesseract,
            lang,
        } => {
            let ocr = TesseractCli::new(tesseract, lang);
            let text = ocr.recognize(&image).await?;
            let candidates = extract_candidates(&text);
            if candidates.is_empty() {
                println!("No 12-digit candidates found");
            }
            for candidate in candidates.iter() {
                println!("candidate: {candidate}");
            }
            if let Some(declared) = declared {
                let declared: String = declared.chars().filter(|c| !c.is_whitespace()).collect();
                let result = match_id(&text, &declared, &IdMatchPolicy::default());
                println!(
                    "best: {}  agreement: {}/12  acceptance: {:?}",
                    result.best_candidate.as_deref().unwrap_or("-"),
                    result.positional_digit_matches,
                    result.acceptance
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models { dir, action } => {
            let dir = dir.unwrap_or_else(idverify_core::default_model_dir);
            if let Some(ModelsAction::Fetch {
                base_url,
                checksums,
                force,
            }) = action
            {
                fetch_models(&dir, &base_url, &checksums, force).await?;
            }
            Ok(if models_installed(&dir) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn fetch_models(
    dir: &Path,
    base_url: &str,
    checksums: &[(String, String)],
    force: bool,
) -> Result<()> {
    let client = reqwest::Client::new();
    for file in [SCRFD_MODEL_FILE, ARCFACE_MODEL_FILE] {
        if dir.join(file).exists() && !force {
            println!("skip     {file} (already installed; --force to replace)");
            continue;
        }
        let expected = checksums
            .iter()
            .find(|(name, _)| name == file)
            .map(|(_, digest)| digest.as_str());
        let (path, digest) = fetch::fetch_model(&client, base_url, dir, file, expected).await?;
        let verified = if expected.is_some() { "verified" } else { "unverified" };
        println!("fetched  {}  sha256:{digest} ({verified})", path.display());
    }
    Ok(())
}

fn models_installed(dir: &Path) -> bool {
    let mut missing = false;
    for file in [SCRFD_MODEL_FILE, ARCFACE_MODEL_FILE] {
        let path = dir.join(file);
        let found = path.exists();
        missing |= !found;
        println!("{}  {}", if found { "ok     " } else { "missing" }, path.display());
    }
    !missing
}

async fn connect(system: bool) -> Result<Verifier1Proxy<'static>> {
    let connection = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    Verifier1Proxy::new(&connection)
        .await
        .context("is idverifyd running?")
}

fn read_documents(files: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    files
        .iter()
        .map(|path| {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            Ok((file_name(path), bytes))
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn exit_code_for(status: &str) -> u8 {
    match status {
        "ok" => 0,
        "client_error" => 1,
        _ => 2,
    }
}

fn pretty(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_requires_files() {
        assert!(Cli::try_parse_from(["idverify", "verify", "-n", "Asha", "-i", "123456789012"]).is_err());
        let cli = Cli::try_parse_from([
            "idverify", "--system", "verify", "-n", "Asha", "-i", "1234 5678 9012", "card_id.png",
        ])
        .unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Verify { ref files, .. } if files.len() == 1));
    }

    #[test]
    fn test_models_fetch_arguments() {
        let digest = "a".repeat(64);
        let checksum = format!("det_10g.onnx={digest}");
        let cli = Cli::try_parse_from([
            "idverify",
            "models",
            "--dir",
            "/opt/models",
            "fetch",
            "--base-url",
            "https://mirror.example.org/buffalo_l",
            "--sha256",
            checksum.as_str(),
        ])
        .unwrap();
        match cli.command {
            Commands::Models {
                dir,
                action: Some(ModelsAction::Fetch { base_url, checksums, force }),
            } => {
                assert_eq!(dir, Some(PathBuf::from("/opt/models")));
                assert_eq!(base_url, "https://mirror.example.org/buffalo_l");
                assert_eq!(checksums, vec![("det_10g.onnx".to_string(), digest)]);
                assert!(!force);
            }
            _ => panic!("expected models fetch"),
        }

        assert!(Cli::try_parse_from(["idverify", "models", "fetch", "--base-url", "http://h", "--sha256", "bad"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["idverify", "models"]).unwrap().command,
            Commands::Models { action: None, .. }
        ));
    }

    #[test]
    fn test_models_installed_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!models_installed(dir.path()));
        std::fs::write(dir.path().join(SCRFD_MODEL_FILE), b"x").unwrap();
        assert!(!models_installed(dir.path()));
        std::fs::write(dir.path().join(ARCFACE_MODEL_FILE), b"x").unwrap();
        assert!(models_installed(dir.path()));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for("ok"), 0);
        assert_eq!(exit_code_for("client_error"), 1);
        assert_eq!(exit_code_for("server_error"), 2);
    }

    #[test]
    fn test_file_name_strips_directories() {
        assert_eq!(file_name(Path::new("/tmp/scans/card_id.png")), "card_id.png");
    }

    #[test]
    fn test_pretty_passes_through_non_json() {
        assert_eq!(pretty("not json"), "not json");
        assert!(pretty(r#"{"success":true}"#).contains("\"success\": true"));
    }
}
