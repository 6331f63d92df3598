use std::path::Path;

use tracing::debug;

use crate::attachment::{Attachment, PendingWrite};
use crate::error::StorageError;

/// Storage backend contract consumed by the attachment manager.
///
/// Writes and deletes are queued by the manager and applied in batches by
/// the flush operations. Every flush drains its queue, whatever the outcome
/// of the individual entries.
pub trait AttachmentStorage {
    /// The attachment whose files this backend stores.
    fn attachment(&self) -> &dyn Attachment;

    /// URL under which a style is served.
    fn public_url(&self, style: &str) -> String;

    /// Whether the file of a style is present in the store.
    ///
    /// Missing files are reported as `Ok(false)`; only connection failures
    /// surface as errors.
    fn exists(&self, style: &str) -> Result<bool, StorageError>;

    /// Copy the stored file of a style to `dest`.
    ///
    /// Returns `Ok(false)` when the file could not be retrieved.
    fn copy_to_local(&self, style: &str, dest: &Path) -> Result<bool, StorageError>;

    fn queue_write(&mut self, write: PendingWrite);

    fn queue_delete(&mut self, path: String);

    fn pending_writes(&self) -> &[PendingWrite];

    fn pending_deletes(&self) -> &[String];

    /// Store every queued write, then clear the write queue.
    fn flush_writes(&mut self) -> Result<(), StorageError>;

    /// Remove every queued path, then clear the delete queue.
    fn flush_deletes(&mut self) -> Result<(), StorageError>;

    /// Queue every style's file for deletion.
    fn queue_all_for_delete(&mut self) {
        if self.attachment().original_filename().is_none() {
            return;
        }
        let attachment = self.attachment();
        let paths: Vec<String> = attachment
            .styles()
            .iter()
            .filter_map(|style| attachment.path(style))
            .collect();
        debug!("Queueing {} path(s) for delete", paths.len());
        for path in paths {
            self.queue_delete(path);
        }
    }

    /// Apply queued deletes, then queued writes.
    fn flush(&mut self) -> Result<(), StorageError> {
        self.flush_deletes()?;
        self.flush_writes()
    }
}
