//! State layer error types.

use std::path::PathBuf;

/// Errors produced by checkpoint, state-file and run-log operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// File-system I/O failure on a specific path.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file the run cannot proceed without does not exist.
    #[error("required input {} not found", .path.display())]
    MissingInput { path: PathBuf },

    /// A required backup could not be taken.
    #[error("backup of {} failed: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_displays_path() {
        let err = StateError::io(
            "/tmp/x/processed.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x/processed.txt"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }

    #[test]
    fn missing_input_displays() {
        let err = StateError::MissingInput {
            path: PathBuf::from("in.txt"),
        };
        assert_eq!(err.to_string(), "required input in.txt not found");
    }

    #[test]
    fn lock_poisoned_displays() {
        assert_eq!(StateError::LockPoisoned.to_string(), "state lock poisoned");
    }
}
