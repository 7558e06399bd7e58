//! Telemetry error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while setting up the audit log.
///
/// Once the logger is running, write failures are reported on stderr and
/// never surface as errors to callers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to create the directory holding the audit file.
    #[error("Failed to create audit log directory {path}: {source}")]
    CreateDir {
        /// Directory we tried to create.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to open the audit file for appending.
    #[error("Failed to open audit log {path}: {source}")]
    Open {
        /// Path to the audit file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to start the writer thread.
    #[error("Failed to spawn audit writer thread: {0}")]
    SpawnWriter(#[source] std::io::Error),

    /// Failed to serialize an entry to JSON.
    #[error("Failed to serialize audit entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_mentions_path() {
        let err = TelemetryError::Open {
            path: PathBuf::from("/nonexistent/traffic.log"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/nonexistent/traffic.log"));
        assert!(err.to_string().contains("denied"));
    }
}
