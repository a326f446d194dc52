use std::path::PathBuf;

use thiserror::Error;

use crate::blob_id::BlobId;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blob not found: {0}")]
    BlobNotFound(BlobId),

    #[error("path is not a directory: '{}'", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid target: '{0}'")]
    InvalidTarget(String),

    #[error("duplicate target: '{0}'")]
    DuplicateTarget(String),

    #[error("tree already contains a node named '{0}'")]
    DuplicateNode(String),

    #[error("unsupported file type at '{}'", .0.display())]
    UnsupportedFileType(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CairnError::Path {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CairnError::Cancelled)
    }

    /// Returns `true` for per-entry I/O errors safe to skip (permission
    /// denied, not found).
    pub fn is_soft_file_error(&self) -> bool {
        let io_err = match self {
            CairnError::Io(e) => e,
            CairnError::Path { source, .. } => source,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn soft_error_classification() {
        let denied = CairnError::path("/x", IoError::new(ErrorKind::PermissionDenied, "denied"));
        assert!(denied.is_soft_file_error());

        let missing = CairnError::Io(IoError::new(ErrorKind::NotFound, "gone"));
        assert!(missing.is_soft_file_error());

        let broken = CairnError::Io(IoError::new(ErrorKind::BrokenPipe, "pipe"));
        assert!(!broken.is_soft_file_error());

        assert!(!CairnError::Cancelled.is_soft_file_error());
    }

    #[test]
    fn cancelled_is_distinct() {
        assert!(CairnError::Cancelled.is_cancelled());
        assert!(!CairnError::Other("x".into()).is_cancelled());
    }

    #[test]
    fn path_error_includes_location() {
        let err = CairnError::path(
            "/etc/secret",
            IoError::new(ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/etc/secret"));
    }
}
