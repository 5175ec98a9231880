//! CLI errors and exit codes.

use std::path::PathBuf;
use std::process;

use coursegen::{ConfigError, DatabaseError, OrchestratorError, WorkerError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open database: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Worker pool failed: {0}")]
    Worker(#[from] WorkerError),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No database path configured and no home directory found")]
    NoDatabasePath,

    #[error("No generator configured; add a \"generator\" section to the config file")]
    NoGenerator,

    #[error("Failed to set signal handler: {0}")]
    Signal(String),

    #[error("Failed to start thread: {0}")]
    Spawn(String),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Exit code 2 for caller mistakes, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Orchestrator(e) if e.is_client_error() => 2,
            CliError::JobNotFound(_) | CliError::ReadDocument { .. } => 2,
            _ => 1,
        }
    }

    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        process::exit(self.exit_code())
    }
}
