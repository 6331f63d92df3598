//! Local filesystem backend for attachment storage.
//!
//! Logical attachment paths are stored below a root directory on the local
//! machine. Queued writes and deletes follow the same flush semantics as the
//! remote backends, which makes this backend a drop-in for development and
//! tests.

mod storage;

pub use storage::LocalStorage;
