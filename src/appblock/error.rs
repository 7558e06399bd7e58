//! App blocker error types.

use thiserror::Error;

/// Outcome of a failed operation on a single process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// The process exited before or during the operation.
    #[error("process no longer exists")]
    ProcessGone,

    /// The OS refused the operation.
    #[error("access denied")]
    AccessDenied,

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Errors from the app blocker as a whole.
#[derive(Debug, Error)]
pub enum AppBlockError {
    /// The process table could not be enumerated.
    #[error("Failed to enumerate processes: {0}")]
    Snapshot(String),

    /// The blocking snapshot task panicked or was cancelled.
    #[error("Process scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(unix)]
impl From<nix::errno::Errno> for ProcessError {
    fn from(errno: nix::errno::Errno) -> Self {
        match errno {
            nix::errno::Errno::ESRCH => ProcessError::ProcessGone,
            nix::errno::Errno::EPERM => ProcessError::AccessDenied,
            other => ProcessError::Other(other.desc().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_display() {
        assert_eq!(ProcessError::AccessDenied.to_string(), "access denied");
        assert_eq!(
            ProcessError::Other("boom".to_string()).to_string(),
            "boom"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_errno_mapping() {
        use nix::errno::Errno;

        assert_eq!(ProcessError::from(Errno::ESRCH), ProcessError::ProcessGone);
        assert_eq!(ProcessError::from(Errno::EPERM), ProcessError::AccessDenied);
        assert!(matches!(
            ProcessError::from(Errno::EINVAL),
            ProcessError::Other(_)
        ));
    }
}
