//! SFTP implementation of [`AttachmentStorage`].

use std::path::Path;

use attachment_storage_core::path::{file_name, parent_dir};
use attachment_storage_core::{
    Attachment, AttachmentStorage, FlushFailure, PendingWrite, StorageError,
};
use tracing::{debug, instrument, warn};

use crate::config::BackendConfig;
use crate::connection::SharedConnections;
use crate::remote::{Connector, RemoteFs};
use crate::resolve::{join_root, remote_path};
use crate::sync;

/// Stores the files of one attachment on an SFTP host.
///
/// Sessions come from the thread's [`SharedConnections`], so every backend
/// built on the same thread with the same connection settings reuses one
/// session.
pub struct SftpStorage<C: Connector> {
    config: BackendConfig,
    attachment: Box<dyn Attachment>,
    connections: SharedConnections<C>,
    queued_for_write: Vec<PendingWrite>,
    queued_for_delete: Vec<String>,
}

impl<C: Connector> SftpStorage<C> {
    pub fn new(
        config: BackendConfig,
        attachment: impl Attachment + 'static,
        connections: SharedConnections<C>,
    ) -> Self {
        Self {
            config,
            attachment: Box::new(attachment),
            connections,
            queued_for_write: Vec::new(),
            queued_for_delete: Vec::new(),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn fs_root(&self) -> &str {
        &self.config.connection.fs_root
    }

    /// Full remote path of a style, `None` if the style has no path or the
    /// path cannot be mapped.
    fn remote_target(&self, style: &str) -> Option<String> {
        let path = self.attachment.path(style)?;
        match remote_path(&path) {
            Some(remote) => Some(join_root(self.fs_root(), &remote)),
            None => {
                warn!("Logical path {} cannot be mapped below the root", path);
                None
            }
        }
    }

    /// Run `op` against the cached session for this backend's settings.
    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut C::Session) -> T,
    ) -> Result<T, StorageError> {
        let mut connections = self.connections.borrow_mut();
        let session = connections.acquire(&self.config.connection)?;
        Ok(op(session))
    }

    fn write_queued(&self, queued: &[PendingWrite]) -> Result<(), StorageError> {
        let mut failures = Vec::new();

        for write in queued {
            let Some(path) = self.attachment.path(&write.style) else {
                failures.push(FlushFailure {
                    style: write.style.clone(),
                    target: String::new(),
                    message: "no path for style".to_string(),
                });
                continue;
            };
            let Some(remote) = remote_path(&path) else {
                failures.push(FlushFailure {
                    style: write.style.clone(),
                    target: path.clone(),
                    message: StorageError::InvalidPath(path).to_string(),
                });
                continue;
            };

            let result = match self.with_session(|session| {
                sync::write_file(session, self.fs_root(), &remote, &write.file)
            }) {
                Ok(result) => result,
                Err(e) => return Err(with_earlier_failures(e, &failures)),
            };

            match result {
                Ok(target) => debug!("Stored style {} at {}", write.style, target),
                Err(e) => {
                    warn!("Failed to store style {}: {}", write.style, e);
                    failures.push(FlushFailure {
                        style: write.style.clone(),
                        target: join_root(self.fs_root(), &remote),
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Flush(failures))
        }
    }

    fn delete_queued(&self, queued: &[String]) -> Result<(), StorageError> {
        for path in queued {
            let Some(remote) = remote_path(path) else {
                warn!("Skipping delete of {}: cannot be mapped below the root", path);
                continue;
            };
            self.with_session(|session| sync::delete_file(session, self.fs_root(), &remote))?;
        }
        Ok(())
    }
}

/// Append the entries that already failed to a connection error that ends a
/// write flush early.
fn with_earlier_failures(e: StorageError, failures: &[FlushFailure]) -> StorageError {
    match e {
        StorageError::Connection(message) if !failures.is_empty() => {
            let earlier: Vec<String> = failures.iter().map(ToString::to_string).collect();
            StorageError::Connection(format!(
                "{} (after {} failed write(s): {})",
                message,
                failures.len(),
                earlier.join("; ")
            ))
        }
        other => other,
    }
}

impl<C: Connector> AttachmentStorage for SftpStorage<C> {
    fn attachment(&self) -> &dyn Attachment {
        self.attachment.as_ref()
    }

    fn public_url(&self, style: &str) -> String {
        let path = self.attachment.path(style).unwrap_or_default();
        match &self.config.host_url {
            Some(host_url) => {
                let prefix = host_url.prefix(self.attachment.as_ref(), style);
                let remote = remote_path(&path).unwrap_or(path);
                format!("{}{}", prefix, remote)
            }
            None if path.starts_with('/') => path,
            None => format!("/{}", path),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn exists(&self, style: &str) -> Result<bool, StorageError> {
        if self.attachment.original_filename().is_none() {
            return Ok(false);
        }
        let Some(target) = self.remote_target(style) else {
            return Ok(false);
        };
        let dir = parent_dir(&target).unwrap_or("/");
        let name = file_name(&target);

        let listing = self.with_session(|session| session.list_dir(dir))?;
        match listing {
            Ok(names) => Ok(names.iter().any(|n| n == name)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => {
                warn!("Failed to list {}: {}", dir, e);
                Ok(false)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn copy_to_local(&self, style: &str, dest: &Path) -> Result<bool, StorageError> {
        let Some(target) = self.remote_target(style) else {
            return Ok(false);
        };

        let result = self.with_session(|session| session.download(&target, dest))?;
        match result {
            Ok(bytes) => {
                debug!("Copied {} bytes from {} to {}", bytes, target, dest.display());
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!("Remote file {} not found", target);
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to copy {} to {}: {}", target, dest.display(), e);
                Ok(false)
            }
        }
    }

    fn queue_write(&mut self, write: PendingWrite) {
        self.queued_for_write.push(write);
    }

    fn queue_delete(&mut self, path: String) {
        self.queued_for_delete.push(path);
    }

    fn pending_writes(&self) -> &[PendingWrite] {
        &self.queued_for_write
    }

    fn pending_deletes(&self) -> &[String] {
        &self.queued_for_delete
    }

    /// Every entry is attempted; failures are collected and reported
    /// together once the post-flush hook has run. A connection failure ends
    /// the flush early. The queue is empty afterwards in every case.
    #[instrument(skip(self), level = "debug", fields(queued = self.queued_for_write.len()))]
    fn flush_writes(&mut self) -> Result<(), StorageError> {
        let queued = std::mem::take(&mut self.queued_for_write);
        let result = self.write_queued(&queued);
        self.attachment.after_flush_writes(&queued);
        result
    }

    #[instrument(skip(self), level = "debug", fields(queued = self.queued_for_delete.len()))]
    fn flush_deletes(&mut self) -> Result<(), StorageError> {
        let queued = std::mem::take(&mut self.queued_for_delete);
        self.delete_queued(&queued)
    }
}
