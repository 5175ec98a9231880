//! Failures of the SQLite layer shared by the queue, the status store and
//! the course stores.
//!
//! `Io` and `Migration` only come from `Database::open`. The rest can
//! surface mid-job, where workers retry them as transient.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A statement failed, including `SQLITE_BUSY` once the busy timeout
    /// runs out while another worker process holds the write lock.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory for the database file could not be created.
    #[error("Cannot create database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Job metadata or course progress stored as JSON did not round-trip.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema upgrade `version` failed; the database is left at the
    /// previous version.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A thread panicked while holding the shared connection.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_error_names_the_path() {
        let err = DatabaseError::Io {
            path: PathBuf::from("/readonly/coursegen"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let message = err.to_string();
        assert!(message.starts_with("Cannot create database directory '/readonly/coursegen'"));
    }

    #[test]
    fn test_migration_error_names_the_version() {
        let err = DatabaseError::Migration {
            version: 6,
            reason: "duplicate column name: last_job_id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration failed at version 6: duplicate column name: last_job_id"
        );
    }
}
