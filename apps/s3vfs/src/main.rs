//! s3vfs - browse and edit a versioned S3 notebook bucket as a file system.
//!
//! # Usage
//!
//! ```text
//! JPYNB_S3_BUCKET=notebooks s3vfs ls work
//! s3vfs --endpoint-url http://localhost:4566 --force-path-style cat work/a.ipynb
//! s3vfs versions work/a.ipynb
//! s3vfs release work/a.ipynb "first draft"
//! ```
//!
//! Every flag falls back to the matching `JPYNB_S3_*` environment variable.
//! `RUST_LOG` overrides `LOG_LEVEL` for the tracing filter.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use clap::{Parser, Subcommand};
use s3vfs_core::document::S3_CREATE_RELEASE;
use s3vfs_core::{S3Store, VersionedDocumentStore, VfsConfig, VirtualFileSystem};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "s3vfs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Browse and edit a versioned S3 notebook bucket")]
struct Cli {
    /// Bucket holding the notebooks
    #[arg(long, global = true, value_name = "BUCKET")]
    bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, global = true, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Custom S3 endpoint
    #[arg(long, global = true, value_name = "URL")]
    endpoint_url: Option<String>,

    /// AWS region
    #[arg(long, global = true, value_name = "REGION")]
    region: Option<String>,

    /// Use path-style addressing
    #[arg(long, global = true)]
    force_path_style: bool,

    /// Log level filter
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the children of a directory
    Ls {
        /// Directory path
        #[arg(default_value = "")]
        path: String,
    },
    /// Show whether a path is a file or directory and when it changed
    Stat {
        /// File or directory path
        path: String,
    },
    /// Print a file
    Cat {
        /// File path
        path: String,
        /// Output format (`text` or `base64`); binary content defaults to base64
        #[arg(short, long)]
        format: Option<String>,
        /// Read this version of a notebook instead of the latest
        #[arg(long, value_name = "VERSION_ID")]
        version: Option<String>,
    },
    /// Upload a local file (or stdin)
    Put {
        /// Destination path
        path: String,
        /// Local source file; reads stdin when omitted
        #[arg(short, long, value_name = "FILE")]
        file: Option<std::path::PathBuf>,
        /// Store the content as text; the source must be UTF-8
        #[arg(long)]
        text: bool,
    },
    /// Create a directory
    Mkdir {
        /// Directory path
        path: String,
    },
    /// Copy a file or directory
    Cp {
        /// Source path
        from: String,
        /// Destination path
        to: String,
    },
    /// Move a file or directory
    Mv {
        /// Source path
        from: String,
        /// Destination path
        to: String,
    },
    /// Remove a file or directory
    Rm {
        /// File or directory path
        path: String,
    },
    /// List the versions of a file
    Versions {
        /// File path
        path: String,
    },
    /// Save a notebook document, reconciling its version metadata
    Save {
        /// Notebook path
        path: String,
        /// Local notebook JSON; reads stdin when omitted
        #[arg(short, long, value_name = "FILE")]
        file: Option<std::path::PathBuf>,
    },
    /// Re-save the latest notebook revision as a named release
    Release {
        /// Notebook path
        path: String,
        /// Release name
        name: String,
    },
}

impl Cli {
    fn config(&self) -> VfsConfig {
        let mut config = VfsConfig::from_env();
        if let Some(bucket) = &self.bucket {
            config.bucket.clone_from(bucket);
        }
        if let Some(prefix) = &self.prefix {
            config.prefix.clone_from(prefix);
        }
        if let Some(endpoint) = &self.endpoint_url {
            config.endpoint_url = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            config.region_name.clone_from(region);
        }
        if self.force_path_style {
            config.force_path_style = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        config
    }
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn read_source(file: Option<&std::path::Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn run(command: Command, docs: &VersionedDocumentStore) -> Result<()> {
    let vfs = docs.vfs();
    match command {
        Command::Ls { path } => {
            for entry in vfs.list(&path).await? {
                println!("{entry}");
            }
        }
        Command::Stat { path } => {
            let kind = if vfs.is_directory(&path).await? {
                "directory"
            } else if vfs.is_file(&path).await? {
                "file"
            } else {
                bail!("No such file or directory: {path}");
            };
            let stat = vfs.stat(&path).await?;
            let modified = stat
                .modified
                .map_or_else(|| "-".to_owned(), |ts| ts.to_rfc3339());
            println!("{kind}\t{modified}");
        }
        Command::Cat {
            path,
            format,
            version,
        } => {
            let content = match version {
                Some(version_id) => docs.open_version(&path, &version_id).await?,
                None => docs.open(&path, format.as_deref()).await?,
            };
            println!("{}", content.content);
        }
        Command::Put { path, file, text } => {
            let bytes = read_source(file.as_deref())?;
            let outcome = if text {
                let content = String::from_utf8(bytes).context("source is not UTF-8")?;
                vfs.write(&path, &content, "text").await?
            } else {
                vfs.write(&path, &BASE64_STANDARD.encode(&bytes), "base64")
                    .await?
            };
            info!(path = %path, version_id = ?outcome.version_id, "uploaded");
        }
        Command::Mkdir { path } => vfs.make_directory(&path).await?,
        Command::Cp { from, to } => vfs.copy(&from, &to).await?,
        Command::Mv { from, to } => vfs.rename(&from, &to).await?,
        Command::Rm { path } => vfs.remove(&path).await?,
        Command::Versions { path } => {
            let versions = vfs.get_versions(&path).await?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        Command::Save { path, file } => {
            let bytes = read_source(file.as_deref())?;
            let document: Value =
                serde_json::from_slice(&bytes).context("document is not valid JSON")?;
            let outcome = docs.save(&path, document).await?;
            if let Some(message) = &outcome.message {
                println!("{message}");
            }
            println!(
                "{:?}\t{}",
                outcome.decision,
                outcome.version_id.as_deref().unwrap_or("-")
            );
        }
        Command::Release { path, name } => {
            let content = docs.open(&path, Some("text")).await?;
            let mut document: Value =
                serde_json::from_str(&content.content).context("document is not valid JSON")?;
            let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) else {
                bail!("{path} has no notebook metadata");
            };
            metadata.insert(S3_CREATE_RELEASE.to_owned(), Value::String(name));
            let outcome = docs.save(&path, document).await?;
            println!(
                "release {}\t{}",
                outcome.release_tag.map_or_else(|| "-".to_owned(), |t| t.to_string()),
                outcome.version_id.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();
    init_tracing(&config.log_level)?;

    info!(
        bucket = %config.bucket,
        prefix = %config.prefix,
        endpoint_url = ?config.endpoint_url,
        "connecting to S3",
    );
    let store = S3Store::from_config(&config).await;
    let vfs = VirtualFileSystem::new(Arc::new(store), &config);

    if let Err(err) = vfs.init().await {
        if err.is_access_denied() {
            // The required policy has already been logged.
            std::process::exit(1);
        }
        error!(error = %err, "failed to initialize the bucket root");
        return Err(err.into());
    }

    let docs = VersionedDocumentStore::new(vfs);
    run(cli.command, &docs).await
}
