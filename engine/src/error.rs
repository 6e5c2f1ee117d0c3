//! Error types for the copy engine.
//!
//! `EngineError` covers everything that can stop a transfer, a batch, or an
//! elevated run. Item-level failures inside a batch are wrapped in
//! `EngineError::Batch` together with the index of the failing item.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the copy engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A source or destination path does not exist.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The current user may not read or write `path`, and no elevation path
    /// was available to retry with.
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    /// The privilege prompt was dismissed or the launcher is unavailable.
    #[error("elevation declined: {reason}")]
    ElevationDeclined { reason: String },

    /// The elevated run reported a failure or produced unreadable output.
    #[error("elevated copy failed: {message}")]
    ElevationFailure { message: String },

    /// Cooperative cancellation was observed at a progress point.
    #[error("transfer cancelled")]
    Cancelled,

    /// A manifest could not be decoded.
    #[error("corrupt manifest: {reason}")]
    Corrupt {
        reason: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Generic read, write, or directory creation failure.
    #[error("failed to {operation} {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination already exists and the conflict policy is `fail`.
    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    /// The caller supplied an unusable source list or destination.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Item `index` of a batch failed; remaining items were not attempted.
    #[error("item {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<EngineError>,
    },
}

/// Flat classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    ElevationDeclined,
    ElevationFailure,
    Cancelled,
    Corrupt,
    IoFailure,
    DestinationExists,
    InvalidInput,
}

impl EngineError {
    /// Map an `io::Error` raised while performing `operation` on `path`.
    ///
    /// Not-found and permission errors get their own variants so callers can
    /// tell a missing source from a write failure without inspecting the
    /// OS error.
    pub fn from_io(operation: &'static str, path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => EngineError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => EngineError::PermissionDenied {
                path: path.to_path_buf(),
                source: Some(err),
            },
            _ => EngineError::Io {
                operation,
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Classify this error, looking through `Batch` wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::ElevationDeclined { .. } => ErrorKind::ElevationDeclined,
            Self::ElevationFailure { .. } => ErrorKind::ElevationFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::DestinationExists { .. } => ErrorKind::DestinationExists,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Batch { source, .. } => source.kind(),
        }
    }

    /// Index of the failing batch item, if this is a batch failure.
    pub fn item_index(&self) -> Option<usize> {
        match self {
            Self::Batch { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            Self::PermissionDenied {
                source: Some(source),
                ..
            } => source.raw_os_error(),
            Self::Batch { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_not_found() {
        let err = EngineError::from_io(
            "open",
            Path::new("/missing"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Destination-side failures map here too, so the message names no side
        let err = EngineError::from_io(
            "set permissions on",
            Path::new("/out/copy.txt"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "not found: /out/copy.txt");
    }

    #[test]
    fn test_from_io_classifies_permission_denied() {
        let err = EngineError::from_io(
            "create",
            Path::new("/root/x"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_from_io_falls_back_to_io_failure() {
        let err = EngineError::from_io(
            "write",
            Path::new("/tmp/x"),
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(err.to_string(), "failed to write /tmp/x");
    }

    #[test]
    fn test_batch_kind_looks_through_wrapper() {
        let err = EngineError::Batch {
            index: 1,
            source: Box::new(EngineError::NotFound {
                path: PathBuf::from("b.txt"),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.item_index(), Some(1));
        assert!(err.to_string().contains("b.txt"));
    }
}
