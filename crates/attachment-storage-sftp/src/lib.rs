//! SFTP storage backend for attachment files.
//!
//! Files are stored below a configurable filesystem root on the remote
//! host. Logical attachment paths are rewritten so their `public` segment
//! sits directly under that root.
//!
//! The backend is synchronous: every remote call blocks the calling thread.
//! Sessions are cached per thread by a [`ConnectionManager`].

mod config;
mod connection;
mod error;
mod memory;
mod remote;
mod resolve;
mod ssh;
mod storage;
mod sync;

pub use config::{BackendConfig, HostUrl, HostUrlFn, SftpConfig, SftpOptions};
pub use connection::{ConnectionManager, SharedConnections};
pub use error::{ConnectionError, RemoteError, RemoteResult};
pub use memory::{Call, MemoryConnector, MemoryFile, MemoryFs, MemoryState, Op};
pub use remote::{Connector, RemoteFs, UPLOAD_MODE};
pub use ssh::{Ssh2Connector, Ssh2Session};
pub use storage::SftpStorage;
