//! p7zfs - 7z filesystem adapters
//!
//! Command line front end: identify resources, list archives, and unpack or
//! pack them through the in-memory filesystem tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use p7zfs::archive::p7zip::{self, P7zPacker, P7zUnpacker, P7Z_FILESYSTEM};
use p7zfs::archive::sevenzip::Archiver;
use p7zfs::config::{parse_timeout, AdapterConfig};
use p7zfs::fs_tree::FilesystemTree;
use p7zfs::identify;
use p7zfs::resource::Resource;

#[derive(Parser)]
#[command(name = "p7zfs")]
#[command(version)]
#[command(about = "Unpack and repack 7z archives through an in-memory filesystem tree")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 7z binary to use (path or name on PATH)
    #[arg(long, global = true, env = "P7ZFS_ARCHIVER")]
    archiver: Option<PathBuf>,

    /// Kill the 7z process after this many seconds
    #[arg(long, global = true, env = "P7ZFS_TIMEOUT", value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Directory for scratch files (defaults to the system temp dir)
    #[arg(long, global = true, env = "P7ZFS_TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected type and tags of a file
    Identify {
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the entries of a 7z archive
    List {
        archive: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Extract a 7z archive into a directory
    Unpack {
        archive: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a 7z archive from a directory
    Pack {
        dir: PathBuf,

        /// Output archive
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Unpack and pack again, writing a fresh archive
    Repack {
        archive: PathBuf,

        /// Output archive
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "p7zfs=debug".parse()? } else { "p7zfs=warn".parse()? }),
            )
            .init();
    }

    let config = AdapterConfig {
        archiver: cli.archiver,
        timeout: cli.timeout,
        temp_dir: cli.temp_dir,
    };
    config.validate()?;

    p7zip::register_identifiers();

    match cli.command {
        Commands::Identify { file, json } => {
            let resource = load_resource(&file).await?;
            let signature = identify::global().identify(&resource).await;
            let tags: Vec<&str> = resource.tags().await.iter().map(|t| t.name()).collect();

            if json {
                let report = serde_json::json!({
                    "path": file,
                    "size": resource.get_data_length().await,
                    "signature": signature,
                    "tags": tags,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("File: {}", file.display());
                match &signature {
                    Some(signature) => {
                        println!("MIME:        {}", signature.mime);
                        println!("Description: {}", signature.description);
                    }
                    None => println!("Type:        unknown"),
                }
                if tags.is_empty() {
                    println!("Tags:        (none)");
                } else {
                    println!("Tags:        {}", tags.join(", "));
                }
            }
        }

        Commands::List { archive, json } => {
            let archiver = Archiver::locate(&config)?;
            let entries = archiver
                .list(&archive)
                .await
                .with_context(|| format!("Failed to list {}", archive.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    if entry.is_dir {
                        println!("{:>12}  {}/", "", entry.path);
                    } else {
                        println!("{:>12}  {}", entry.size, entry.path);
                    }
                }
                let files = entries.iter().filter(|e| !e.is_dir).count();
                eprintln!("\nTotal: {} files, {} entries", files, entries.len());
            }
        }

        Commands::Unpack { archive, output } => {
            let resource = load_archive(&archive).await?;
            let unpacker = P7zUnpacker::from_config(config)?;

            let pb = spinner(format!("Unpacking {}", archive.display()))?;
            let result = unpacker.unpack(&resource).await;
            pb.finish_and_clear();
            result.with_context(|| format!("Failed to unpack {}", archive.display()))?;

            let tree = resource
                .take_tree()
                .await
                .context("Unpacker attached no filesystem tree")?;
            let count = tree.file_count();
            let target = output.clone();
            tokio::task::spawn_blocking(move || tree.flush_to_disk(&target))
                .await?
                .with_context(|| format!("Failed to write files to {}", output.display()))?;

            println!("Extracted {} files to {}", count, output.display());
        }

        Commands::Pack { dir, output } => {
            let source = dir.clone();
            let tree = tokio::task::spawn_blocking(move || FilesystemTree::from_disk(&source))
                .await?
                .with_context(|| format!("Failed to read {}", dir.display()))?;

            let resource = Resource::new(Vec::new());
            resource.add_tag(P7Z_FILESYSTEM).await;
            resource.set_tree(tree).await;

            let packer = P7zPacker::from_config(config)?;
            let pb = spinner(format!("Packing {}", dir.display()))?;
            let result = packer.pack(&resource).await;
            pb.finish_and_clear();
            result.with_context(|| format!("Failed to pack {}", dir.display()))?;

            write_resource(&resource, &output).await?;
        }

        Commands::Repack { archive, output } => {
            let resource = load_archive(&archive).await?;
            let unpacker = P7zUnpacker::from_config(config.clone())?;
            let packer = P7zPacker::from_config(config)?;

            let pb = spinner(format!("Repacking {}", archive.display()))?;
            let result = async {
                unpacker.unpack(&resource).await?;
                packer.pack(&resource).await
            }
            .await;
            pb.finish_and_clear();
            result.with_context(|| format!("Failed to repack {}", archive.display()))?;

            write_resource(&resource, &output).await?;
        }
    }

    Ok(())
}

async fn load_resource(path: &Path) -> Result<Resource> {
    Resource::from_file(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Load `path` and make sure it identifies as a 7z archive.
async fn load_archive(path: &Path) -> Result<Resource> {
    let resource = load_resource(path).await?;
    identify::global().identify(&resource).await;

    if !resource.has_tag(P7Z_FILESYSTEM).await {
        bail!("{} is not a 7z archive", path.display());
    }
    Ok(resource)
}

async fn write_resource(resource: &Resource, output: &Path) -> Result<()> {
    let data = resource.get_data().await;
    tokio::fs::write(output, &data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} bytes to {}", data.len(), output.display());
    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}
