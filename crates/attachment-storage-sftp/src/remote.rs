//! Remote filesystem abstraction the sync engine drives.

use std::path::Path;

use crate::config::SftpConfig;
use crate::error::{ConnectionError, RemoteResult};

/// Permission bits applied to every uploaded file.
pub const UPLOAD_MODE: u32 = 0o644;
/// Permission bits for directories created on the way to an upload.
pub const DIR_MODE: u32 = 0o755;

/// Blocking operations on a live remote session.
pub trait RemoteFs {
    /// Names of the entries of a directory.
    fn list_dir(&mut self, path: &str) -> RemoteResult<Vec<String>>;

    fn mkdir(&mut self, path: &str, mode: u32) -> RemoteResult<()>;

    /// Copy a local file to `remote`, returning the number of bytes sent.
    fn upload(&mut self, local: &Path, remote: &str) -> RemoteResult<u64>;

    fn set_permissions(&mut self, path: &str, mode: u32) -> RemoteResult<()>;

    fn remove_file(&mut self, path: &str) -> RemoteResult<()>;

    /// Remove an empty directory.
    fn remove_dir(&mut self, path: &str) -> RemoteResult<()>;

    /// Copy `remote` to a local file, returning the number of bytes received.
    fn download(&mut self, remote: &str, local: &Path) -> RemoteResult<u64>;

    /// Close the session. Further calls are not expected to succeed.
    fn disconnect(&mut self);
}

/// Opens sessions for a configuration.
pub trait Connector {
    type Session: RemoteFs;

    fn connect(&self, config: &SftpConfig) -> Result<Self::Session, ConnectionError>;
}
