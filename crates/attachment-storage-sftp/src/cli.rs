use std::path::PathBuf;

use attachment_storage_core::StorageError;
use attachment_storage_sftp::{BackendConfig, HostUrl, SftpConfig};
use clap::{Parser, Subcommand};

/// Command line of the attachment-sftp tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "attachment-sftp")]
#[command(about = "Store, fetch and remove attachment files on an SFTP host")]
pub struct Cli {
    /// JSON backend config (host, user, fs_root, options, sftp_host)
    #[arg(long, env = "SFTP_CONFIG")]
    pub config: Option<PathBuf>,

    /// SFTP host
    #[arg(long, env = "SFTP_HOST")]
    pub host: Option<String>,

    /// SFTP user
    #[arg(long, env = "SFTP_USER")]
    pub user: Option<String>,

    /// Remote directory that logical paths are stored under
    #[arg(long, env = "SFTP_FS_ROOT")]
    pub fs_root: Option<String>,

    #[arg(long, env = "SFTP_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "SFTP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key file for public-key authentication
    #[arg(long, env = "SFTP_PRIVATE_KEY")]
    pub private_key: Option<PathBuf>,

    /// Prefix for public URLs
    #[arg(long, env = "SFTP_PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// Run against an empty in-memory remote and log the calls made
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a local file to the remote location of a logical path
    Upload {
        #[arg(long)]
        path: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete logical paths and prune the directories they leave empty
    Delete {
        #[arg(long, required = true)]
        path: Vec<String>,
    },
    /// Print whether the file of a logical path is stored
    Exists {
        #[arg(long)]
        path: String,
    },
    /// Download the file of a logical path
    Fetch {
        #[arg(long)]
        path: String,
        #[arg(long)]
        dest: PathBuf,
    },
    /// Print the public URL of a logical path
    Url {
        #[arg(long)]
        path: String,
    },
    /// Apply a JSON manifest of uploads and deletes with parallel workers
    Batch {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value = "4")]
        workers: usize,
    },
}

impl Cli {
    /// Backend config from `--config`, overridden by individual flags.
    pub fn backend_config(&self) -> Result<BackendConfig, StorageError> {
        let mut config = match &self.config {
            Some(path) => BackendConfig::from_json_file(path)?,
            None => {
                let host = self
                    .host
                    .clone()
                    .ok_or_else(|| StorageError::Config("--host is required".to_string()))?;
                let user = self
                    .user
                    .clone()
                    .ok_or_else(|| StorageError::Config("--user is required".to_string()))?;
                BackendConfig::new(SftpConfig::new(host, user))
            }
        };

        let connection = &mut config.connection;
        if let Some(host) = &self.host {
            connection.host = host.clone();
        }
        if let Some(user) = &self.user {
            connection.user = user.clone();
        }
        if let Some(fs_root) = &self.fs_root {
            connection.fs_root = fs_root.clone();
        }
        if let Some(port) = self.port {
            connection.options.port = port;
        }
        if self.password.is_some() {
            connection.options.password = self.password.clone();
        }
        if self.private_key.is_some() {
            connection.options.private_key = self.private_key.clone();
        }
        if let Some(public_host) = &self.public_host {
            config.host_url = Some(HostUrl::Fixed(public_host.clone()));
        }
        Ok(config)
    }
}
