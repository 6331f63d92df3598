//! Error types for the SFTP backend.

use attachment_storage_core::StorageError;

/// SFTP status code for a missing file.
pub const SFTP_NO_SUCH_FILE: i32 = 2;
/// SFTP status code for a missing path component.
pub const SFTP_NO_SUCH_PATH: i32 = 10;
/// Generic SFTP failure status.
pub const SFTP_FAILURE: i32 = 4;

/// Establishing a session failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("TCP connection to {host}:{port} failed: {source}")]
    Tcp {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH handshake with {host} failed: {message}")]
    Handshake { host: String, message: String },

    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("SFTP subsystem unavailable on {host}: {message}")]
    Subsystem { host: String, message: String },
}

/// A remote filesystem operation failed.
///
/// `NotFound` is split out so callers can treat a missing file as an
/// expected outcome without matching on status codes.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("No such file: {path}")]
    NotFound { path: String },

    #[error("SFTP status {code} on {path}: {message}")]
    Status {
        path: String,
        code: i32,
        message: String,
    },

    #[error("Transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Local file {path} unavailable: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Build from a raw SFTP status code.
    pub fn from_status(path: &str, code: i32, message: impl Into<String>) -> Self {
        if code == SFTP_NO_SUCH_FILE || code == SFTP_NO_SUCH_PATH {
            RemoteError::NotFound {
                path: path.to_string(),
            }
        } else {
            RemoteError::Status {
                path: path.to_string(),
                code,
                message: message.into(),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<ConnectionError> for StorageError {
    fn from(e: ConnectionError) -> Self {
        StorageError::Connection(e.to_string())
    }
}

impl From<RemoteError> for StorageError {
    fn from(e: RemoteError) -> Self {
        StorageError::Remote(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_statuses_map_to_not_found() {
        assert!(RemoteError::from_status("/a", SFTP_NO_SUCH_FILE, "x").is_not_found());
        assert!(RemoteError::from_status("/a", SFTP_NO_SUCH_PATH, "x").is_not_found());
        assert!(!RemoteError::from_status("/a", SFTP_FAILURE, "x").is_not_found());
    }

    #[test]
    fn test_status_message_names_path_and_code() {
        let err = RemoteError::from_status("/srv/public/a", 3, "permission denied");
        assert_eq!(
            err.to_string(),
            "SFTP status 3 on /srv/public/a: permission denied"
        );
    }
}
