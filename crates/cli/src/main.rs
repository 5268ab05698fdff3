//! Administrative CLI for the corral core directory.

use clap::{Parser, Subcommand};
use corral_catalog::error::ErrorKind as CatalogErrorKind;
use corral_catalog::{Catalog, Channel, Policy, Submission};
use corral_config::{Settings, StorageSettings};
use corral_descriptor::{SpdxLicenses, TrustStore};
use corral_index::{Database, Repository};
use corral_storage::BackendHandle;
use corral_storage::backend::{LocalBackend, S3Backend};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "corral", version, about = "Catalog service for hardware IP-core packages")]
struct Cli {
    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the package index from the canonical store.
    ///
    /// Without --force this only runs when the index is empty (the startup
    /// trigger policy); with --force it always performs a full pass.
    InitDb {
        #[arg(long)]
        force: bool,
    },
    /// Validate a descriptor (and optional signature) without publishing.
    Validate {
        core_file: PathBuf,
        #[arg(long)]
        signature_file: Option<PathBuf>,
    },
    /// Validate and publish a descriptor to the canonical store.
    Publish {
        core_file: PathBuf,
        #[arg(long)]
        signature_file: Option<PathBuf>,
    },
    /// List indexed packages.
    List {
        /// Case-insensitive substring filter on the VLNV.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print one package's raw descriptor content.
    Get { core: String },
    /// Write a zip bundle of every indexed descriptor.
    Archive {
        #[arg(long, default_value = corral_catalog::query::ARCHIVE_FILENAME)]
        output: PathBuf,
    },
    /// List vendors with library and package counts.
    Vendors,
    /// Reload the SPDX license list from disk.
    RefreshLicenses,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings = Settings::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    let catalog = build_catalog(&settings).await?;

    match cli.command {
        Command::InitDb { force } => {
            let report = match force {
                true => Some(catalog.reconcile().await.map_err(|e| e.to_string())?),
                false => catalog.reconcile_if_empty().await.map_err(|e| e.to_string())?,
            };
            match report {
                None => println!("Index already initialized."),
                Some(report) => {
                    println!("Indexed {} packages ({} pruned).", report.indexed, report.pruned);
                    for (path, reason) in &report.skipped {
                        println!("  skipped {}: {reason}", path.display());
                    }
                    for (vlnv, path) in &report.ambiguous {
                        println!("  ambiguous {vlnv}: ignored {}", path.display());
                    }
                },
            }
        },
        Command::Validate { core_file, signature_file } => {
            let submission = submission_from_files(&core_file, signature_file.as_deref())?;
            match catalog.validate(&submission).await {
                Ok(validated) => {
                    println!("Core file is valid: {} (signature: {})", validated.vlnv, validated.signature);
                },
                Err(err) => return Err(render_rejection(&err)),
            }
        },
        Command::Publish { core_file, signature_file } => {
            let submission = submission_from_files(&core_file, signature_file.as_deref())?;
            match catalog.publish(&submission).await {
                Ok(published) => {
                    println!("Published {} to {}", published.vlnv, published.descriptor_path.display());
                },
                Err(err) => return Err(render_rejection(&err)),
            }
        },
        Command::List { filter } => {
            let packages = catalog.list(filter.as_deref()).await.map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&packages).map_err(|e| e.to_string())?);
        },
        Command::Get { core } => {
            let record = catalog.get(&core).await.map_err(|e| e.to_string())?;
            print!("{}", record.content);
        },
        Command::Archive { output } => {
            let bytes = catalog.archive().await.map_err(|e| e.to_string())?;
            std::fs::write(&output, &bytes).map_err(|e| e.to_string())?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        },
        Command::Vendors => {
            let vendors = catalog.vendors().await.map_err(|e| e.to_string())?;
            println!("{}", serde_json::to_string_pretty(&vendors).map_err(|e| e.to_string())?);
        },
        Command::RefreshLicenses => {
            let count = catalog.refresh_licenses().await.map_err(|e| e.to_string())?;
            println!("SPDX license list loaded: {count} identifiers.");
        },
    }
    Ok(())
}

async fn build_catalog(settings: &Settings) -> Result<Catalog, String> {
    let backend: BackendHandle = match &settings.storage {
        StorageSettings::Local { root } => {
            Arc::new(LocalBackend::new("local", root).map_err(|e| e.to_string())?)
        },
        StorageSettings::S3 { bucket, region, prefix, endpoint, key_id, key_secret } => Arc::new(
            S3Backend::new(
                "s3",
                bucket,
                prefix.clone(),
                region,
                endpoint.as_deref(),
                key_id,
                key_secret,
            )
            .await
            .map_err(|e| e.to_string())?,
        ),
    };
    if let Some(parent) = settings.index.path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let db = Database::connect(&settings.index.path).await.map_err(|e| e.to_string())?;
    let mut catalog = Catalog::new(backend, Repository::from(&db))
        .with_trust(TrustStore::from_hex_keys(&settings.trust.keys))
        .with_policy(Policy {
            allow_overwrite: settings.publish.allow_overwrite,
            max_descriptor_bytes: settings.publish.max_descriptor_bytes,
            max_signature_bytes: settings.publish.max_signature_bytes,
        });
    if let Some(path) = &settings.spdx.licenses_path {
        catalog = catalog.with_licenses_path(path);
        match SpdxLicenses::load(path) {
            Ok(spdx) => catalog = catalog.with_licenses(spdx),
            Err(err) => tracing::warn!(error = %err, "could not load SPDX license list"),
        }
    }
    Ok(catalog)
}

fn submission_from_files(core_file: &Path, signature_file: Option<&Path>) -> Result<Submission, String> {
    let name = core_file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("bad core file name: {}", core_file.display()))?;
    let bytes = std::fs::read(core_file).map_err(|e| format!("{}: {e}", core_file.display()))?;
    let mut submission = Submission::new(name, bytes).via(Channel::Api);
    if let Some(signature_file) = signature_file {
        let signature_name = signature_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("bad signature file name: {}", signature_file.display()))?;
        let signature_bytes =
            std::fs::read(signature_file).map_err(|e| format!("{}: {e}", signature_file.display()))?;
        submission = submission.with_signature(signature_name, signature_bytes);
    }
    Ok(submission)
}

/// Render a pipeline rejection as field-level lines; other errors pass
/// through as their display form.
fn render_rejection(err: &corral_catalog::error::Error) -> String {
    match &**err {
        CatalogErrorKind::Rejected(issues) => {
            let mut out = String::from("validation failed:\n");
            for issue in &issues.0 {
                out.push_str(&format!("  {issue}\n"));
            }
            out
        },
        other => other.to_string(),
    }
}
