//! # FileHaven CLI
//!
//! Command-line front end for the FileHaven upload library.
//!
//! This binary uploads files and whole folder trees to FileHaven,
//! mirroring the local directory structure remotely, and offers basic
//! folder listing and creation.
//!
//! ## Usage
//!
//! ```bash
//! # Upload a folder tree (mirrors structure under the base folder)
//! haven-cli upload ./photos
//!
//! # Upload single files, asking the service for content hashes
//! haven-cli upload notes.txt report.pdf --hashes
//!
//! # List the base folder
//! haven-cli list
//!
//! # Create a private subfolder
//! haven-cli create-folder Archive --access private
//! ```
//!
//! ## Authentication
//!
//! Credentials can be provided via:
//! - Command-line arguments: `--username`, `--password`
//! - Environment variables: `FILEHAVEN_USERNAME`, `FILEHAVEN_PASSWORD`
//! - A settings file: `--config settings.json`

use clap::{Parser, Subcommand};
use filehaven_rust::{
    AccessType, Credentials, FolderUploadEngine, HavenClient, ProgressEvent, ProgressSink,
    RemoteApi, RemoteFolder, Settings, UploadOptions, UploadReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit code indicating successful completion.
const EXIT_SUCCESS: u8 = 0;
/// Exit code indicating a general error occurred.
const EXIT_ERROR: u8 = 1;

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "haven-cli")]
#[command(
    author,
    version,
    about = "FileHaven CLI - folder-mirroring upload tool"
)]
#[command(
    long_about = "Uploads files and folders to FileHaven, recreating the local\n\
directory structure remotely.\n\n\
Features:\n\
  - Recursive folder upload with per-folder authorization keys\n\
  - Partial-failure reporting (one failed file never aborts the run)\n\
  - Optional content-hash tracking per uploaded file\n\
  - Folder listing and creation"
)]
struct Cli {
    /// Enable verbose logging (can also use RUST_LOG env var)
    #[arg(short, long)]
    verbose: bool,

    /// FileHaven username - can also use FILEHAVEN_USERNAME env var
    #[arg(short, long, env = "FILEHAVEN_USERNAME")]
    username: Option<String>,

    /// FileHaven password - can also use FILEHAVEN_PASSWORD env var
    #[arg(short, long, env = "FILEHAVEN_PASSWORD")]
    password: Option<String>,

    /// Path to a settings JSON file (Username/Password/BaseFolderHash/FolderKey)
    #[arg(short, long, env = "FILEHAVEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files or folders to FileHaven
    Upload {
        /// Files or directories to upload
        paths: Vec<PathBuf>,

        /// Target folder hash (defaults to the configured base folder)
        #[arg(short = 'd', long)]
        folder: Option<String>,

        /// Authorization key for --folder (required when --folder is set)
        #[arg(short, long)]
        key: Option<String>,

        /// Ask the service to return a content hash per file
        #[arg(long)]
        hashes: bool,

        /// Access flag for created folders: link or private
        #[arg(long, default_value = "link")]
        access: String,
    },

    /// List folder contents
    List {
        /// Folder hash to list (defaults to the configured base folder)
        folder: Option<String>,

        /// Include subfolders in the listing
        #[arg(short, long)]
        subfolders: bool,
    },

    /// Create a folder
    CreateFolder {
        /// Folder name to create
        name: String,

        /// Parent folder hash (defaults to the configured base folder)
        #[arg(long)]
        parent: Option<String>,

        /// Access flag: link or private
        #[arg(long, default_value = "link")]
        access: String,
    },

    /// Verify credentials and print the base folder identity
    Login,
}

fn parse_access(access_str: &str) -> AccessType {
    match access_str.to_lowercase().as_str() {
        "private" => AccessType::Private,
        _ => AccessType::Link,
    }
}

fn format_size(size: u64) -> String {
    let mut size = size as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

// =============================================================================
// Progress Display
// =============================================================================

/// Progress sink backed by an indicatif bar. The engine emits item counts;
/// the bar renders them.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg:30!} [{bar:30.cyan/blue}] {pos}/{len}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressSink for BarSink {
    fn emit(&self, event: ProgressEvent) {
        self.bar.set_length(event.total);
        self.bar.set_position(event.completed);
        if event.finished {
            self.bar
                .finish_with_message(format!("{} ({:.1?})", event.activity, event.elapsed));
        } else {
            self.bar.set_message(event.activity);
        }
    }
}

// =============================================================================
// Session Setup
// =============================================================================

/// Everything a command needs: an authenticated client, the credentials to
/// pass through to folder creation, and the base folder uploads land in.
struct SessionContext {
    client: HavenClient,
    creds: Credentials,
    base: RemoteFolder,
}

/// Resolves credentials (flags/env override the settings file), logs in,
/// and picks the base folder: the settings file wins when present,
/// otherwise the one the login response reports.
async fn connect(cli: &Cli) -> Result<SessionContext, Box<dyn std::error::Error>> {
    let settings = match &cli.config {
        Some(path) => Some(Settings::load(path)?),
        None => None,
    };

    let username = cli
        .username
        .clone()
        .or_else(|| settings.as_ref().map(|s| s.username.clone()));
    let password = cli
        .password
        .clone()
        .or_else(|| settings.as_ref().map(|s| s.password.clone()));

    let (Some(username), Some(password)) = (username, password) else {
        return Err("Authentication required! Provide:\n  \
             • --username and --password, or\n  \
             • Set FILEHAVEN_USERNAME/FILEHAVEN_PASSWORD environment variables, or\n  \
             • --config pointing at a settings JSON file"
            .into());
    };

    let mut client = HavenClient::new();
    let session = client.login(&username, &password).await?;

    let base = settings
        .as_ref()
        .map(|s| s.base_folder())
        .unwrap_or(session.base);

    Ok(SessionContext {
        client,
        creds: Credentials { username, password },
        base,
    })
}

fn print_report(report: &UploadReport, want_hashes: bool) {
    println!(
        "\n{} Upload complete: {} uploaded, {} failed",
        if report.success() { "✓" } else { "✗" },
        report.succeeded,
        report.failures.len()
    );
    if report.cancelled {
        println!("  (run was cancelled before completion)");
    }

    if want_hashes && !report.uploaded.is_empty() {
        println!("\nContent hashes:");
        for (path, hash) in &report.uploaded {
            println!("  {hash}  {}", path.display());
        }
    }

    if !report.failures.is_empty() {
        println!("\nFailures:");
        for failure in &report.failures {
            println!("  ✗ {}: {}", failure.path.display(), failure.message);
        }
    }
}

// =============================================================================
// Entry Point
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Main application logic.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("filehaven_rust=debug,haven_cli=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("filehaven_rust=warn,haven_cli=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match &cli.command {
        Commands::Upload {
            paths,
            folder,
            key,
            hashes,
            access,
        } => {
            if paths.is_empty() {
                return Err("No files to upload".into());
            }

            let ctx = connect(&cli).await?;

            // An explicit --folder target replaces the base folder; it needs
            // its key supplied alongside.
            let target = match (folder, key) {
                (Some(hash), Some(key)) => RemoteFolder {
                    hash: hash.clone(),
                    add_key: Some(key.clone()),
                    edit_key: None,
                },
                (Some(_), None) => {
                    return Err("--folder requires --key for authorization".into());
                }
                _ => ctx.base.clone(),
            };
            let Some(target_key) = target.upload_key().map(str::to_string) else {
                return Err("target folder has no authorization key".into());
            };

            let opts = UploadOptions {
                want_hashes: *hashes,
                access: parse_access(access),
                cancel: None,
            };

            let sink = BarSink::new();
            let engine = FolderUploadEngine::new(&ctx.client, &sink);

            let mut report = UploadReport::default();
            for path in paths {
                if !path.exists() {
                    eprintln!("✗ Not found: {}", path.display());
                    continue;
                }

                let partial = if path.is_dir() {
                    println!("📁 Uploading directory: {}", path.display());
                    engine
                        .upload_folder(path, &target, &ctx.creds, &opts)
                        .await?
                } else {
                    engine
                        .upload_single_file(path, &target.hash, &target_key, opts.want_hashes)
                        .await?
                };
                report.merge(partial);
            }

            print_report(&report, *hashes);
            if !report.success() {
                return Err(format!("{} file(s) failed to upload", report.failures.len()).into());
            }
        }

        Commands::List { folder, subfolders } => {
            let ctx = connect(&cli).await?;
            let hash = folder.clone().unwrap_or_else(|| ctx.base.hash.clone());

            let items = ctx.client.list_folder(&hash, *subfolders).await?;
            if items.is_empty() {
                println!("Folder '{hash}' is empty");
                return Ok(());
            }

            println!("\nContents of '{hash}':\n");
            println!("{:<10} {:<40} {:<15}", "Type", "Name", "Size");
            println!("{}", "-".repeat(70));

            for item in items {
                let item_type = if item.is_folder { "DIR" } else { "FILE" };
                let size_str = match item.size {
                    Some(size) if !item.is_folder => format_size(size),
                    _ => "-".to_string(),
                };
                println!("{:<10} {:<40} {:<15}", item_type, item.name, size_str);
            }
            println!();
        }

        Commands::CreateFolder {
            name,
            parent,
            access,
        } => {
            let ctx = connect(&cli).await?;
            let parent_hash = parent.clone().unwrap_or_else(|| ctx.base.hash.clone());

            let folder = ctx
                .client
                .create_folder(name, &parent_hash, parse_access(access), &ctx.creds)
                .await?;

            println!("✓ Created folder: {name}");
            println!("  hash: {}", folder.hash);
            if let Some(key) = folder.upload_key() {
                println!("  key:  {key}");
            }
        }

        Commands::Login => {
            let ctx = connect(&cli).await?;
            println!("✓ Authenticated successfully");
            println!("  base folder: {}", ctx.base.hash);
            println!(
                "  upload key:  {}",
                mask_key(ctx.base.upload_key().unwrap_or(""))
            );
        }
    }

    Ok(())
}

fn mask_key(key: &str) -> String {
    if key.chars().count() <= 4 {
        return "****".to_string();
    }
    let head: String = key.chars().take(4).collect();
    format!("{head}****")
}
