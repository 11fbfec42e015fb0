/*!
Error types for the backup engine.
*/

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the backup core.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Errors that can occur while matching tables, creating backups or expiring them.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The table name pattern is not a valid regular expression
    #[error("Invalid table pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration values failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O errors while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing store rejected or failed a call
    #[error("Store error during {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    /// The referenced backup does not exist (any more)
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// A store call did not finish within the configured timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The run was cancelled before the call completed
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// A spawned task ended without reporting a result
    #[error("Task for '{0}' ended without reporting a result")]
    TaskAborted(String),

    /// Table enumeration stopped early and strict listing is enabled
    #[error("Table listing incomplete after {pages} page(s): {source}")]
    IncompleteListing {
        pages: usize,
        #[source]
        source: Box<BackupError>,
    },
}

impl BackupError {
    /// Create a new store error
    pub fn store<S: Into<String>>(operation: &'static str, msg: S) -> Self {
        Self::Store {
            operation,
            message: msg.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors caused by the run's deadline or cancellation rather than the store
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
