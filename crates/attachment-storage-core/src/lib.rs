//! Core traits and types for attachment storage backends.
//!
//! This crate defines the contract shared between the local filesystem and
//! remote storage implementations:
//! - `Attachment`: the upstream attachment manager (logical paths per style)
//! - `AttachmentStorage`: queued writes/deletes, flushes, and queries
//! - `StorageError`: the error taxonomy every backend reports through

mod attachment;
mod error;
pub mod path;
mod storage;

pub use attachment::{Attachment, MappedAttachment, PendingWrite, DEFAULT_STYLE};
pub use error::{FlushFailure, StorageError};
pub use storage::AttachmentStorage;
