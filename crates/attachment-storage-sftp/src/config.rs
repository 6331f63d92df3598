//! Backend configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use attachment_storage_core::{Attachment, StorageError};
use serde::{Deserialize, Serialize};

/// Options handed to the SFTP client when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SftpOptions {
    pub port: u16,
    pub password: Option<String>,
    /// Private key file for public-key authentication
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Try identities from a running SSH agent first
    pub use_agent: bool,
    /// TCP connect and session timeout (seconds). Unset or zero leaves the
    /// transport defaults in place.
    pub timeout_secs: Option<u64>,
    pub compress: bool,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            port: 22,
            password: None,
            private_key: None,
            passphrase: None,
            use_agent: true,
            timeout_secs: None,
            compress: false,
        }
    }
}

impl SftpOptions {
    /// Timeout to apply to the connection, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

/// Connection settings of a backend.
///
/// Two values with identical fields share one cached session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    pub user: String,
    /// Directory on the remote host that logical paths are stored under
    #[serde(default = "default_fs_root")]
    pub fs_root: String,
    #[serde(default)]
    pub options: SftpOptions,
}

fn default_fs_root() -> String {
    "/".to_string()
}

impl SftpConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            fs_root: default_fs_root(),
            options: SftpOptions::default(),
        }
    }

    pub fn with_fs_root(mut self, fs_root: impl Into<String>) -> Self {
        self.fs_root = fs_root.into();
        self
    }

    pub fn with_options(mut self, options: SftpOptions) -> Self {
        self.options = options;
        self
    }
}

/// Function computing the public host prefix for a style.
pub type HostUrlFn = dyn Fn(&dyn Attachment, &str) -> String + Send + Sync;

/// How public URLs are prefixed.
#[derive(Clone)]
pub enum HostUrl {
    /// Literal prefix, served as `/{value}`
    Fixed(String),
    /// Prefix computed per attachment and style, used exactly as returned
    Callable(Arc<HostUrlFn>),
}

impl HostUrl {
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&dyn Attachment, &str) -> String + Send + Sync + 'static,
    {
        HostUrl::Callable(Arc::new(f))
    }

    /// Prefix for a style of `attachment`.
    pub fn prefix(&self, attachment: &dyn Attachment, style: &str) -> String {
        match self {
            HostUrl::Fixed(host) => format!("/{}", host.trim_matches('/')),
            HostUrl::Callable(f) => f(attachment, style),
        }
    }
}

impl fmt::Debug for HostUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostUrl::Fixed(host) => f.debug_tuple("Fixed").field(host).finish(),
            HostUrl::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// Complete configuration of an SFTP backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub connection: SftpConfig,
    pub host_url: Option<HostUrl>,
}

/// On-disk form of [`BackendConfig`].
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    connection: SftpConfig,
    #[serde(default)]
    sftp_host: Option<String>,
}

impl BackendConfig {
    pub fn new(connection: SftpConfig) -> Self {
        Self {
            connection,
            host_url: None,
        }
    }

    pub fn with_host_url(mut self, host_url: HostUrl) -> Self {
        self.host_url = Some(host_url);
        self
    }

    /// Parse a JSON document with `host`, `user`, `fs_root`, `options` and
    /// `sftp_host` keys.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let file: FileConfig = serde_json::from_str(json)
            .map_err(|e| StorageError::Config(format!("Invalid backend config: {}", e)))?;
        Ok(Self {
            connection: file.connection,
            host_url: file.sftp_host.map(HostUrl::Fixed),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, StorageError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}
