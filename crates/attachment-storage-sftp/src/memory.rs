//! In-memory remote filesystem.
//!
//! Backs the CLI's `--dry-run` mode and the tests. Every operation is
//! recorded, and status failures can be injected per operation and path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use attachment_storage_core::path::{file_name, join_child, parent_dir};

use crate::config::SftpConfig;
use crate::error::{ConnectionError, RemoteError, RemoteResult, SFTP_FAILURE};
use crate::remote::{Connector, RemoteFs};

/// Mode given to freshly uploaded files before permissions are set.
const INITIAL_FILE_MODE: u32 = 0o600;

/// Kind of remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Mkdir,
    Upload,
    Chmod,
    RemoveFile,
    RemoveDir,
    Download,
}

/// A recorded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub session: u64,
    pub op: Op,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    pub data: Vec<u8>,
    pub mode: u32,
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    path: String,
    code: i32,
}

/// Remote tree shared by every session of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryState {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, MemoryFile>,
    pub calls: Vec<Call>,
    pub connects: usize,
    pub disconnects: usize,
    /// Reject every connection attempt as an authentication failure
    pub refuse_connections: bool,
    faults: Vec<Fault>,
    next_id: u64,
}

impl Default for MemoryState {
    fn default() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            dirs,
            files: BTreeMap::new(),
            calls: Vec::new(),
            connects: 0,
            disconnects: 0,
            refuse_connections: false,
            faults: Vec::new(),
            next_id: 0,
        }
    }
}

impl MemoryState {
    pub fn shared() -> Arc<Mutex<MemoryState>> {
        Arc::new(Mutex::new(MemoryState::default()))
    }

    /// Create a directory and all of its ancestors.
    pub fn add_dir(&mut self, path: &str) {
        let mut current = "/".to_string();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = join_child(&current, part);
            self.dirs.insert(current.clone());
        }
    }

    /// Create a file, creating its parent directories as needed.
    pub fn add_file(&mut self, path: &str, data: &[u8]) {
        if let Some(parent) = parent_dir(path) {
            self.add_dir(parent);
        }
        self.files.insert(
            path.to_string(),
            MemoryFile {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
    }

    /// Make every `op` on `path` fail with SFTP status `code`.
    pub fn fail(&mut self, op: Op, path: &str, code: i32) {
        self.faults.push(Fault {
            op,
            path: path.to_string(),
            code,
        });
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn file(&self, path: &str) -> Option<&MemoryFile> {
        self.files.get(path)
    }

    /// Paths of every recorded call of one kind, in order.
    pub fn paths_of(&self, op: Op) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.op == op)
            .map(|c| c.path.clone())
            .collect()
    }

    fn record(&mut self, session: u64, op: Op, path: &str) -> RemoteResult<()> {
        self.calls.push(Call {
            session,
            op,
            path: path.to_string(),
        });
        match self.faults.iter().find(|f| f.op == op && f.path == path) {
            Some(fault) => Err(RemoteError::from_status(path, fault.code, "injected failure")),
            None => Ok(()),
        }
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let dirs = self.dirs.iter().filter(|d| d.as_str() != "/");
        dirs.chain(self.files.keys())
            .filter(|p| parent_dir(p) == Some(dir))
            .map(|p| file_name(p).to_string())
            .collect()
    }

    fn require_parent(&self, path: &str) -> RemoteResult<()> {
        match parent_dir(path) {
            Some(parent) if self.dirs.contains(parent) => Ok(()),
            _ => Err(RemoteError::NotFound {
                path: path.to_string(),
            }),
        }
    }
}

fn failure(path: &str, message: &str) -> RemoteError {
    RemoteError::from_status(path, SFTP_FAILURE, message)
}

fn not_found(path: &str) -> RemoteError {
    RemoteError::NotFound {
        path: path.to_string(),
    }
}

/// Session on a [`MemoryState`] tree.
#[derive(Debug)]
pub struct MemoryFs {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

impl MemoryFs {
    /// Identifier distinguishing sessions of the same connector.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteFs for MemoryFs {
    fn list_dir(&mut self, path: &str) -> RemoteResult<Vec<String>> {
        let mut state = self.state();
        state.record(self.id, Op::List, path)?;
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(state.children(path));
        Ok(names)
    }

    fn mkdir(&mut self, path: &str, _mode: u32) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(self.id, Op::Mkdir, path)?;
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(failure(path, "already exists"));
        }
        state.require_parent(path)?;
        state.dirs.insert(path.to_string());
        Ok(())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> RemoteResult<u64> {
        let mut state = self.state();
        state.record(self.id, Op::Upload, remote)?;
        let data = std::fs::read(local).map_err(|source| RemoteError::Local {
            path: local.display().to_string(),
            source,
        })?;
        state.require_parent(remote)?;
        let len = data.len() as u64;
        state.files.insert(
            remote.to_string(),
            MemoryFile {
                data,
                mode: INITIAL_FILE_MODE,
            },
        );
        Ok(len)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(self.id, Op::Chmod, path)?;
        match state.files.get_mut(path) {
            Some(file) => {
                file.mode = mode;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn remove_file(&mut self, path: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(self.id, Op::RemoveFile, path)?;
        state.files.remove(path).map(|_| ()).ok_or_else(|| not_found(path))
    }

    fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(self.id, Op::RemoveDir, path)?;
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        if !state.children(path).is_empty() {
            return Err(failure(path, "directory not empty"));
        }
        state.dirs.remove(path);
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> RemoteResult<u64> {
        let mut state = self.state();
        state.record(self.id, Op::Download, remote)?;
        let file = state.files.get(remote).ok_or_else(|| not_found(remote))?;
        std::fs::write(local, &file.data).map_err(|source| RemoteError::Local {
            path: local.display().to_string(),
            source,
        })?;
        Ok(file.data.len() as u64)
    }

    fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state().disconnects += 1;
        }
    }
}

/// Connector handing out sessions on one shared [`MemoryState`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new(state: Arc<Mutex<MemoryState>>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<Mutex<MemoryState>> {
        self.state.clone()
    }
}

impl Connector for MemoryConnector {
    type Session = MemoryFs;

    fn connect(&self, config: &SftpConfig) -> Result<MemoryFs, ConnectionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.refuse_connections {
            return Err(ConnectionError::Auth {
                user: config.user.clone(),
                host: config.host.clone(),
            });
        }
        state.connects += 1;
        state.next_id += 1;
        Ok(MemoryFs {
            id: state.next_id,
            state: self.state.clone(),
            closed: false,
        })
    }
}
