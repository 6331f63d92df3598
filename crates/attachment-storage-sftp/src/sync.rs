//! Reconciliation of queued writes and deletes against the remote tree.

use std::path::Path;

use attachment_storage_core::path::{file_name, is_hidden, join_child, parent_dir};
use tracing::{debug, warn};

use crate::error::RemoteResult;
use crate::remote::{RemoteFs, DIR_MODE, UPLOAD_MODE};
use crate::resolve::{join_root, root_dir};

/// Create `remote_dir` (a path relative to `fs_root`) one component at a
/// time, listing each parent first so existing components are skipped.
pub fn ensure_remote_dir<S>(fs: &mut S, fs_root: &str, remote_dir: &str) -> RemoteResult<()>
where
    S: RemoteFs + ?Sized,
{
    let mut current = root_dir(fs_root).to_string();
    for component in remote_dir.split('/').filter(|c| !c.is_empty()) {
        let existing = fs.list_dir(&current)?;
        let child = join_child(&current, component);
        if !existing.iter().any(|name| name == component) {
            debug!("Creating remote directory {}", child);
            if let Err(e) = fs.mkdir(&child, DIR_MODE) {
                // Another session may have created it since the listing.
                let now = fs.list_dir(&current)?;
                if !now.iter().any(|name| name == component) {
                    return Err(e);
                }
            }
        }
        current = child;
    }
    Ok(())
}

/// Upload `local` to `fs_root + remote`, creating missing directories and
/// setting the upload permissions. Returns the full target path.
pub fn write_file<S>(fs: &mut S, fs_root: &str, remote: &str, local: &Path) -> RemoteResult<String>
where
    S: RemoteFs + ?Sized,
{
    if let Some(dir) = parent_dir(remote) {
        ensure_remote_dir(fs, fs_root, dir)?;
    }
    let target = join_root(fs_root, remote);
    let bytes = fs.upload(local, &target)?;
    fs.set_permissions(&target, UPLOAD_MODE)?;
    debug!("Uploaded {} bytes to {}", bytes, target);
    Ok(target)
}

/// Remove `fs_root + remote` and prune the directories it leaves empty.
///
/// Removal failures are logged, never returned: a missing file counts as
/// already deleted.
pub fn delete_file<S>(fs: &mut S, fs_root: &str, remote: &str)
where
    S: RemoteFs + ?Sized,
{
    let target = join_root(fs_root, remote);
    match fs.remove_file(&target) {
        Ok(()) => debug!("Removed {}", target),
        Err(e) if e.is_not_found() => debug!("{} already removed", target),
        Err(e) => warn!("Failed to remove {}: {}", target, e),
    }
    let pruned = prune_empty_ancestors(fs, fs_root, &target);
    if pruned > 0 {
        debug!("Pruned {} empty director(ies) above {}", pruned, file_name(&target));
    }
}

/// Remove the ancestors of `path` that hold no visible entries, walking up
/// until a directory is non-empty, a call fails, or `fs_root` is reached.
/// Returns the number of directories removed.
pub fn prune_empty_ancestors<S>(fs: &mut S, fs_root: &str, path: &str) -> usize
where
    S: RemoteFs + ?Sized,
{
    let root = root_dir(fs_root);
    let mut removed = 0;
    let mut dir = parent_dir(path);

    while let Some(current) = dir {
        if !is_below(current, root) {
            break;
        }
        let visible = match fs.list_dir(current) {
            Ok(names) => names.iter().filter(|n| !is_hidden(n)).count(),
            Err(_) => break,
        };
        if visible > 0 {
            break;
        }
        if fs.remove_dir(current).is_err() {
            break;
        }
        removed += 1;
        dir = parent_dir(current);
    }
    removed
}

/// Whether `path` lies strictly inside `root`.
fn is_below(path: &str, root: &str) -> bool {
    if root == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SftpConfig;
    use crate::memory::{MemoryConnector, MemoryFs, MemoryState, Op};
    use crate::remote::Connector;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn session(state: &Arc<Mutex<MemoryState>>) -> MemoryFs {
        MemoryConnector::new(state.clone())
            .connect(&SftpConfig::new("h", "u"))
            .unwrap()
    }

    #[test]
    fn test_ensure_remote_dir_creates_missing_components() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_dir("/srv/public");
        let mut fs = session(&state);

        ensure_remote_dir(&mut fs, "/srv", "/public/avatars/1").unwrap();

        let state = state.lock().unwrap();
        assert!(state.has_dir("/srv/public/avatars/1"));
        assert_eq!(
            state.paths_of(Op::Mkdir),
            vec!["/srv/public/avatars", "/srv/public/avatars/1"]
        );
        assert_eq!(
            state.paths_of(Op::List),
            vec!["/srv", "/srv/public", "/srv/public/avatars"]
        );
    }

    #[test]
    fn test_ensure_remote_dir_under_slash_root() {
        let state = MemoryState::shared();
        let mut fs = session(&state);

        ensure_remote_dir(&mut fs, "/", "/public/a").unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.paths_of(Op::Mkdir), vec!["/public", "/public/a"]);
        assert_eq!(state.paths_of(Op::List)[0], "/");
    }

    #[test]
    fn test_ensure_remote_dir_is_noop_when_present() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_dir("/srv/public/a");
        let mut fs = session(&state);

        ensure_remote_dir(&mut fs, "/srv", "/public/a").unwrap();
        assert!(state.lock().unwrap().paths_of(Op::Mkdir).is_empty());
    }

    /// Session whose mkdir loses a race: the directory appears, but the
    /// call itself reports a failure.
    struct RacingFs {
        inner: MemoryFs,
        state: Arc<Mutex<MemoryState>>,
    }

    impl RemoteFs for RacingFs {
        fn list_dir(&mut self, path: &str) -> RemoteResult<Vec<String>> {
            self.inner.list_dir(path)
        }
        fn mkdir(&mut self, path: &str, _mode: u32) -> RemoteResult<()> {
            self.state.lock().unwrap().add_dir(path);
            Err(crate::error::RemoteError::from_status(path, 4, "already exists"))
        }
        fn upload(&mut self, local: &Path, remote: &str) -> RemoteResult<u64> {
            self.inner.upload(local, remote)
        }
        fn set_permissions(&mut self, path: &str, mode: u32) -> RemoteResult<()> {
            self.inner.set_permissions(path, mode)
        }
        fn remove_file(&mut self, path: &str) -> RemoteResult<()> {
            self.inner.remove_file(path)
        }
        fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
            self.inner.remove_dir(path)
        }
        fn download(&mut self, remote: &str, local: &Path) -> RemoteResult<u64> {
            self.inner.download(remote, local)
        }
        fn disconnect(&mut self) {
            self.inner.disconnect()
        }
    }

    #[test]
    fn test_ensure_remote_dir_accepts_concurrently_created_component() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_dir("/srv");
        let mut fs = RacingFs {
            inner: session(&state),
            state: state.clone(),
        };

        ensure_remote_dir(&mut fs, "/srv", "/public/a").unwrap();
        assert!(state.lock().unwrap().has_dir("/srv/public/a"));
    }

    #[test]
    fn test_ensure_remote_dir_reports_failed_mkdir() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_dir("/srv");
            s.fail(Op::Mkdir, "/srv/public", 3);
        }
        let mut fs = session(&state);

        let err = ensure_remote_dir(&mut fs, "/srv", "/public/a").unwrap_err();
        assert!(matches!(err, crate::error::RemoteError::Status { code: 3, .. }));
        assert_eq!(state.lock().unwrap().paths_of(Op::List), vec!["/srv", "/srv"]);
    }

    #[test]
    fn test_write_file_uploads_and_sets_mode() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_dir("/srv");
        let mut fs = session(&state);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("upload.png");
        std::fs::write(&local, b"png bytes").unwrap();

        let target = write_file(&mut fs, "/srv", "/public/avatars/1/original.png", &local).unwrap();

        assert_eq!(target, "/srv/public/avatars/1/original.png");
        let state = state.lock().unwrap();
        let file = state.file(&target).unwrap();
        assert_eq!(file.data, b"png bytes");
        assert_eq!(file.mode, 0o644);
    }

    #[test]
    fn test_write_file_stops_on_mkdir_failure() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_dir("/srv/public");
        state.lock().unwrap().fail(Op::Mkdir, "/srv/public/a", 3);
        let mut fs = session(&state);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f.txt");
        std::fs::write(&local, b"x").unwrap();

        let err = write_file(&mut fs, "/srv", "/public/a/f.txt", &local).unwrap_err();

        assert!(!err.is_not_found());
        assert!(state.lock().unwrap().paths_of(Op::Upload).is_empty());
    }

    #[test]
    fn test_delete_prunes_empty_ancestors() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_file("/srv/public/a/b/file.txt", b"x");
            s.add_file("/srv/public/keep.txt", b"k");
        }
        let mut fs = session(&state);

        delete_file(&mut fs, "/srv", "/public/a/b/file.txt");

        let state = state.lock().unwrap();
        assert!(state.file("/srv/public/a/b/file.txt").is_none());
        assert_eq!(
            state.paths_of(Op::RemoveDir),
            vec!["/srv/public/a/b", "/srv/public/a"]
        );
        assert!(state.has_dir("/srv/public"));
    }

    #[test]
    fn test_prune_never_removes_fs_root() {
        let state = MemoryState::shared();
        state.lock().unwrap().add_file("/srv/public/a/file.txt", b"x");
        let mut fs = session(&state);

        delete_file(&mut fs, "/srv", "/public/a/file.txt");

        let state = state.lock().unwrap();
        assert!(!state.has_dir("/srv/public"));
        assert!(state.has_dir("/srv"));
        assert_eq!(
            state.paths_of(Op::RemoveDir),
            vec!["/srv/public/a", "/srv/public"]
        );
    }

    #[test]
    fn test_prune_ignores_hidden_entries_only_in_listing() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_file("/srv/public/a/file.txt", b"x");
            s.add_file("/srv/public/a/.keep", b"");
            s.add_file("/srv/public/other.txt", b"o");
        }
        let mut fs = session(&state);

        delete_file(&mut fs, "/srv", "/public/a/file.txt");

        // `.keep` is filtered from the listing, so removal is attempted and
        // refused by the server; the loop stops there.
        let state = state.lock().unwrap();
        assert_eq!(state.paths_of(Op::RemoveDir), vec!["/srv/public/a"]);
        assert!(state.has_dir("/srv/public/a"));
    }

    #[test]
    fn test_delete_of_missing_file_still_prunes() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_dir("/srv/public/a/b");
            s.add_file("/srv/public/x.txt", b"x");
        }
        let mut fs = session(&state);

        delete_file(&mut fs, "/srv", "/public/a/b/gone.txt");

        let state = state.lock().unwrap();
        assert!(!state.has_dir("/srv/public/a"));
        assert!(state.has_dir("/srv/public"));
    }

    #[test]
    fn test_delete_failure_is_swallowed() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_file("/srv/public/a/file.txt", b"x");
            s.fail(Op::RemoveFile, "/srv/public/a/file.txt", 3);
        }
        let mut fs = session(&state);

        delete_file(&mut fs, "/srv", "/public/a/file.txt");

        let state = state.lock().unwrap();
        assert!(state.file("/srv/public/a/file.txt").is_some());
        assert!(state.has_dir("/srv/public/a"));
    }

    #[test]
    fn test_prune_stops_on_list_failure() {
        let state = MemoryState::shared();
        {
            let mut s = state.lock().unwrap();
            s.add_dir("/srv/public/a/b");
            s.fail(Op::List, "/srv/public/a", 3);
        }
        let mut fs = session(&state);

        let removed = prune_empty_ancestors(&mut fs, "/srv", "/srv/public/a/b/f.txt");

        assert_eq!(removed, 1);
        assert!(state.lock().unwrap().has_dir("/srv/public/a"));
    }

    #[test]
    fn test_is_below() {
        assert!(is_below("/srv/public", "/srv"));
        assert!(!is_below("/srv", "/srv"));
        assert!(!is_below("/srvx/public", "/srv"));
        assert!(is_below("/public", "/"));
        assert!(!is_below("/", "/"));
    }
}
