//! The `noted` binary's command surface: a thin driver around
//! [`crate::sync::SyncDriver`], per the CLI surface the sync engine is
//! consumed through.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Diagnostic;
use thiserror::Error;

use crate::config::Config;
use crate::error::SyncError;
use crate::rpc::HttpServerClient;
use crate::store::sqlite_store::SqliteStore;
use crate::sync::{ConfirmPrompt, SyncDriver, SyncMode};

#[derive(Parser, Debug)]
#[command(name = "noted", about = "Bidirectional note sync")]
pub struct Cli {
    /// Path to a TOML config file, layered under NOTED_-prefixed env vars.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile local state with the server.
    Sync {
        /// Force a full resync from USN 0 instead of an incremental step sync.
        #[arg(short, long)]
        full: bool,
    },
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("unauthorized")]
    #[diagnostic(code(noted::unauthorized), help("your session has expired; log in again"))]
    Unauthorized,

    #[error("sync cancelled")]
    #[diagnostic(code(noted::cancelled))]
    UserCancelled,

    #[error("sync conflict: {0}")]
    #[diagnostic(code(noted::conflict), help("re-run sync once the server settles"))]
    Conflict(String),

    #[error("network error: {0}")]
    #[diagnostic(code(noted::network))]
    Network(String),

    #[error(transparent)]
    #[diagnostic(code(noted::internal))]
    Internal(#[from] SyncError),

    #[error(transparent)]
    #[diagnostic(code(noted::config))]
    Config(#[from] figment::Error),

    #[error(transparent)]
    #[diagnostic(code(noted::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Unauthorized => 2,
            CliError::UserCancelled => 3,
            _ => 1,
        }
    }
}

/// A [`ConfirmPrompt`] that asks the user on stdin/stdout, the way a CLI
/// front-end collaborator would.
pub struct StdinConfirm;

impl ConfirmPrompt for StdinConfirm {
    fn confirm(&self, message: &str) -> bool {
        print!("{message} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    std::fs::create_dir_all(&config.data_dir)?;

    let store = SqliteStore::open(&config.db_path()).map_err(SyncError::from)?;
    let session_cookie = std::env::var("NOTED_SESSION_COOKIE").unwrap_or_default();
    let client = HttpServerClient::new(&config, session_cookie).map_err(SyncError::from)?;

    let Command::Sync { full } = cli.command;
    let mode = if full { SyncMode::Full } else { SyncMode::Step };

    let driver = SyncDriver::new(&store, &client);
    let result = driver.run(mode, &StdinConfirm).await;

    match result {
        Ok(summary) => {
            println!(
                "synced {} book(s), {} note(s); last_max_usn={}",
                summary.books_synced, summary.notes_synced, summary.last_max_usn
            );
            Ok(())
        }
        Err(SyncError::Unauthorized) => Err(CliError::Unauthorized),
        Err(SyncError::UserCancelled) => Err(CliError::UserCancelled),
        Err(SyncError::Conflict) => Err(CliError::Conflict("unresolved after retrying".into())),
        Err(SyncError::NetworkTransient(msg)) => Err(CliError::Network(msg)),
        Err(err @ SyncError::Internal(_)) => Err(CliError::Internal(err)),
    }
}
