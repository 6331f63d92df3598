//! Mapping of logical attachment paths onto the remote filesystem.
//!
//! Logical paths live under a `public` segment. On the remote side that
//! segment is rooted directly below the backend's `fs_root`, so everything
//! in front of it is dropped.

const PUBLIC_SEGMENT: &str = "public";

/// Remote path of a logical path: everything through the last `public`
/// segment is replaced with `/public`.
///
/// Returns `None` when the path has no `public` segment, or when it has a
/// `.` or `..` component and could therefore resolve outside the root.
pub fn remote_path(logical: &str) -> Option<String> {
    if logical.split('/').any(|c| c == "." || c == "..") {
        return None;
    }
    let start = last_public_segment(logical)?;
    let rest = &logical[start + PUBLIC_SEGMENT.len()..];
    Some(format!("/{}{}", PUBLIC_SEGMENT, rest))
}

/// Byte offset of the last `public` component in `path`.
fn last_public_segment(path: &str) -> Option<usize> {
    path.match_indices(PUBLIC_SEGMENT)
        .map(|(idx, _)| idx)
        .filter(|&idx| {
            let before_ok = idx == 0 || path.as_bytes()[idx - 1] == b'/';
            let end = idx + PUBLIC_SEGMENT.len();
            let after_ok = end == path.len() || path.as_bytes()[end] == b'/';
            before_ok && after_ok
        })
        .last()
}

/// Prefix a remote path with the filesystem root.
pub fn join_root(fs_root: &str, remote: &str) -> String {
    let root = fs_root.trim_end_matches('/');
    if remote.starts_with('/') {
        format!("{}{}", root, remote)
    } else {
        format!("{}/{}", root, remote)
    }
}

/// The filesystem root as a directory path (`/` when empty).
pub fn root_dir(fs_root: &str) -> &str {
    let root = fs_root.trim_end_matches('/');
    if root.is_empty() {
        "/"
    } else {
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "/system/attachments/1/original/public/avatars/1/original.png",
        "/public/avatars/1/original.png"
    )]
    #[case("/var/www/app/public/system/a.png", "/public/system/a.png")]
    #[case("public/a.png", "/public/a.png")]
    #[case("/public/a/public/b.png", "/public/b.png")]
    #[case("/srv/public", "/public")]
    #[case("/srv/publications/public/x.pdf", "/public/x.pdf")]
    fn test_remote_path(#[case] logical: &str, #[case] expected: &str) {
        assert_eq!(remote_path(logical).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("/system/attachments/1/a.png")]
    #[case("/srv/publications/x.pdf")]
    #[case("")]
    #[case("/app/public/../../etc/cron.d/job")]
    #[case("/app/public/a/../../../b.png")]
    #[case("/app/public/./a.png")]
    #[case("/app/../public/a.png")]
    fn test_remote_path_rejects_unmappable(#[case] logical: &str) {
        assert_eq!(remote_path(logical), None);
    }

    #[rstest]
    #[case("/public/avatars/1/original.png")]
    #[case("/public")]
    #[case("/public/a/b/c.txt")]
    fn test_remote_path_is_idempotent(#[case] path: &str) {
        let once = remote_path(path).unwrap();
        assert_eq!(once, path);
        assert_eq!(remote_path(&once).unwrap(), once);
    }

    #[rstest]
    #[case("/srv", "/public/a.png", "/srv/public/a.png")]
    #[case("/srv/", "/public/a.png", "/srv/public/a.png")]
    #[case("/", "/public/a.png", "/public/a.png")]
    #[case("", "/public/a.png", "/public/a.png")]
    fn test_join_root(#[case] root: &str, #[case] remote: &str, #[case] expected: &str) {
        assert_eq!(join_root(root, remote), expected);
    }

    #[test]
    fn test_root_dir() {
        assert_eq!(root_dir("/"), "/");
        assert_eq!(root_dir(""), "/");
        assert_eq!(root_dir("/srv/"), "/srv");
    }
}
