//! fieldsync operator CLI.
//!
//! Offline tools for inspecting and maintaining a fieldsync local
//! store on a device or a copy pulled from one.
//!
//! # Commands
//!
//! - `status` - sync metadata and queue counts
//! - `quarantine` - list and review quarantined records
//! - `logs` - show the durable sync log
//! - `inspect` - table and storage statistics
//! - `prune` - delete synced records to free space

mod commands;

use clap::{Parser, Subcommand};
use fieldsync_store::{EncryptionKey, LocalStore, StoreOptions};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const SALT_FILE: &str = "key.salt";

/// fieldsync local store operator tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Passphrase for an encrypted store
    #[arg(global = true, long, env = "FIELDSYNC_PASSPHRASE")]
    passphrase: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync metadata and queue counts
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List and review quarantined records
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Show the durable sync log, newest first
    Logs {
        /// Maximum number of entries
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show table and storage statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete already-synced records to free space
    Prune {
        /// Target free space as a percentage of capacity
        #[arg(short, long, default_value = "20")]
        target_free_pct: u8,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined records
    List {
        /// Filter by review status (pending, resolved, discarded)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of rows
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Mark a quarantined record resolved
    Resolve {
        /// Quarantine row id
        id: Uuid,

        /// Review notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Mark a quarantined record discarded
    Discard {
        /// Quarantine row id
        id: Uuid,

        /// Discard reason
        #[arg(short, long)]
        reason: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if matches!(cli.command, Commands::Version) {
        println!("fieldsync {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("store path required (--path)")?;
    let store = open_store(&path, cli.passphrase.as_deref())?;

    match cli.command {
        Commands::Status { format } => commands::status::run(&store, &format)?,
        Commands::Quarantine { action } => match action {
            QuarantineAction::List {
                status,
                limit,
                format,
            } => commands::quarantine::list(&store, status.as_deref(), limit, &format)?,
            QuarantineAction::Resolve { id, notes } => {
                commands::quarantine::resolve(&store, id, notes)?;
            }
            QuarantineAction::Discard { id, reason } => {
                commands::quarantine::discard(&store, id, reason)?;
            }
        },
        Commands::Logs { limit, format } => commands::logs::run(&store, limit, &format)?,
        Commands::Inspect { format } => commands::inspect::run(&store, &path, &format)?,
        Commands::Prune { target_free_pct } => commands::prune::run(&store, target_free_pct)?,
        Commands::Version => unreachable!(),
    }

    Ok(())
}

/// Opens the store, deriving the journal key from the passphrase and
/// the per-store salt file when one is given.
fn open_store(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<Arc<LocalStore>, Box<dyn std::error::Error>> {
    let key = match passphrase {
        Some(passphrase) => {
            let salt = load_or_create_salt(path)?;
            Some(EncryptionKey::derive_from_passphrase(
                passphrase.as_bytes(),
                &salt,
            )?)
        }
        None => None,
    };

    let store = LocalStore::open_with_options(
        path,
        StoreOptions {
            key,
            ..Default::default()
        },
    )?;
    Ok(Arc::new(store))
}

fn load_or_create_salt(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let salt_path = path.join(SALT_FILE);
    if salt_path.exists() {
        return Ok(std::fs::read(&salt_path)?);
    }
    let mut salt = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    std::fs::create_dir_all(path)?;
    std::fs::write(&salt_path, &salt)?;
    Ok(salt)
}
