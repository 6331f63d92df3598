use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use attachment_storage_core::path::is_hidden;
use attachment_storage_core::{
    Attachment, AttachmentStorage, FlushFailure, PendingWrite, StorageError,
};
use tracing::{debug, instrument, warn};

/// Permission bits applied to every stored file.
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Stores the files of one attachment below a local root directory.
pub struct LocalStorage {
    root: PathBuf,
    attachment: Box<dyn Attachment>,
    queued_for_write: Vec<PendingWrite>,
    queued_for_delete: Vec<String>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, attachment: impl Attachment + 'static) -> Self {
        Self {
            root: root.into(),
            attachment: Box::new(attachment),
            queued_for_write: Vec::new(),
            queued_for_delete: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a logical path below the root.
    ///
    /// Paths that would escape the root are rejected.
    fn local_path(&self, logical: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(logical.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(logical.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn target(&self, style: &str) -> Option<PathBuf> {
        let path = self.attachment.path(style)?;
        match self.local_path(&path) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn store(&self, write: &PendingWrite, target: &Path) -> io::Result<u64> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(&write.file, target)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(FILE_MODE))?;
        }
        Ok(bytes)
    }

    fn remove(&self, target: &Path) {
        match fs::remove_file(target) {
            Ok(()) => debug!("Removed {}", target.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already removed", target.display())
            }
            Err(e) => warn!("Failed to remove {}: {}", target.display(), e),
        }
        let pruned = self.prune_empty_ancestors(target);
        if pruned > 0 {
            debug!("Pruned {} empty director(ies) above {}", pruned, target.display());
        }
    }

    /// Remove the ancestors of `path` holding no visible entries, stopping at
    /// the first non-empty directory, the first failure, or the root.
    fn prune_empty_ancestors(&self, path: &Path) -> usize {
        let mut removed = 0;
        let mut dir = path.parent();

        while let Some(current) = dir {
            if current == self.root.as_path() || !current.starts_with(&self.root) {
                break;
            }
            let visible = match fs::read_dir(current) {
                Ok(entries) => entries
                    .filter_map(Result::ok)
                    .filter(|e| !is_hidden(&e.file_name().to_string_lossy()))
                    .count(),
                Err(_) => break,
            };
            if visible > 0 || fs::remove_dir(current).is_err() {
                break;
            }
            removed += 1;
            dir = current.parent();
        }
        removed
    }
}

impl AttachmentStorage for LocalStorage {
    fn attachment(&self) -> &dyn Attachment {
        self.attachment.as_ref()
    }

    fn public_url(&self, style: &str) -> String {
        let path = self.attachment.path(style).unwrap_or_default();
        if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn exists(&self, style: &str) -> Result<bool, StorageError> {
        if self.attachment.original_filename().is_none() {
            return Ok(false);
        }
        Ok(self.target(style).is_some_and(|target| target.is_file()))
    }

    #[instrument(skip(self), level = "debug")]
    fn copy_to_local(&self, style: &str, dest: &Path) -> Result<bool, StorageError> {
        let Some(target) = self.target(style) else {
            return Ok(false);
        };
        match fs::copy(&target, dest) {
            Ok(bytes) => {
                debug!("Copied {} bytes from {} to {}", bytes, target.display(), dest.display());
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to copy {} to {}: {}", target.display(), dest.display(), e);
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

    #[instrument(skip(self), level = "debug", fields(queued = self.queued_for_write.len()))]
    fn flush_writes(&mut self) -> Result<(), StorageError> {
        let queued = std::mem::take(&mut self.queued_for_write);
        let mut failures = Vec::new();

        for write in &queued {
            let path = self.attachment.path(&write.style).unwrap_or_default();
            let result = self
                .local_path(&path)
                .and_then(|target| self.store(write, &target).map(|_| target).map_err(Into::into));
            match result {
                Ok(target) => debug!("Stored style {} at {}", write.style, target.display()),
                Err(e) => {
                    warn!("Failed to store style {}: {}", write.style, e);
                    failures.push(FlushFailure {
                        style: write.style.clone(),
                        target: path,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.attachment.after_flush_writes(&queued);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Flush(failures))
        }
    }

    #[instrument(skip(self), level = "debug", fields(queued = self.queued_for_delete.len()))]
    fn flush_deletes(&mut self) -> Result<(), StorageError> {
        let queued = std::mem::take(&mut self.queued_for_delete);
        for path in &queued {
            match self.local_path(path) {
                Ok(target) => self.remove(&target),
                Err(e) => warn!("Skipping delete: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attachment_storage_core::MappedAttachment;

    fn storage(root: &Path) -> LocalStorage {
        LocalStorage::new(root, MappedAttachment::single("/public/a/original.png"))
    }

    #[test]
    fn test_local_path_joins_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert_eq!(
            storage.local_path("/public/a/b.txt").unwrap(),
            dir.path().join("public/a/b.txt")
        );
        assert_eq!(
            storage.local_path("public/a/b.txt").unwrap(),
            dir.path().join("public/a/b.txt")
        );
    }

    #[test]
    fn test_local_path_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert!(matches!(
            storage.local_path("/public/../../etc/passwd"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(storage.local_path("/").is_err());
    }

    #[test]
    fn test_prune_stops_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let nested = dir.path().join("public/a/b");
        fs::create_dir_all(&nested).unwrap();

        let removed = storage.prune_empty_ancestors(&nested.join("file.txt"));

        assert_eq!(removed, 3);
        assert!(dir.path().exists());
        assert!(!dir.path().join("public").exists());
    }

    #[test]
    fn test_prune_keeps_directory_with_hidden_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let nested = dir.path().join("public/a");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("public/.keep"), b"").unwrap();

        let removed = storage.prune_empty_ancestors(&nested.join("file.txt"));

        // `public` only holds a hidden entry, so listing counts it empty, but
        // the removal itself fails and pruning stops there.
        assert_eq!(removed, 1);
        assert!(dir.path().join("public").exists());
    }
}
