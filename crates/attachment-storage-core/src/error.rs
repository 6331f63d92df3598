use std::fmt;

/// A single queued write that could not be completed during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    /// Style of the failed entry
    pub style: String,
    /// Target path the entry was written to (logical path if unresolved)
    pub target: String,
    /// Error message reported by the backend
    pub message: String,
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.style, self.target, self.message)
    }
}

/// Errors reported by attachment storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Authentication or handshake with the remote host failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote host rejected an operation.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A logical path cannot be mapped onto the storage layout.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more queued writes failed; the rest of the batch was still attempted.
    #[error("{} queued write(s) failed: {}", .0.len(), join_failures(.0))]
    Flush(Vec<FlushFailure>),
}

fn join_failures(failures: &[FlushFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_error_lists_every_failure() {
        let err = StorageError::Flush(vec![
            FlushFailure {
                style: "thumb".to_string(),
                target: "/srv/public/a/thumb.png".to_string(),
                message: "permission denied".to_string(),
            },
            FlushFailure {
                style: "original".to_string(),
                target: "/srv/public/a/original.png".to_string(),
                message: "quota exceeded".to_string(),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.starts_with("2 queued write(s) failed"));
        assert!(msg.contains("thumb (/srv/public/a/thumb.png): permission denied"));
        assert!(msg.contains("original (/srv/public/a/original.png): quota exceeded"));
    }
}
