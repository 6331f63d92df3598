//! Helpers for `/`-separated storage paths.
//!
//! Remote paths are plain strings rather than `std::path::Path` values: they
//! name locations on another host and always use `/` regardless of platform.

/// Parent directory of `path`, `None` for the root or a bare name.
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) => None,
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Final component of `path`.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Append a single component to a directory path.
pub fn join_child(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Directory entries starting with `.` are hidden or system entries.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/public/a/b/file.txt", Some("/public/a/b"))]
    #[case("/public/a/", Some("/public"))]
    #[case("/public", Some("/"))]
    #[case("/", None)]
    #[case("file.txt", None)]
    fn test_parent_dir(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(parent_dir(path), expected);
    }

    #[rstest]
    #[case("/public/a/file.txt", "file.txt")]
    #[case("/public/a/", "a")]
    #[case("name", "name")]
    fn test_file_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(file_name(path), expected);
    }

    #[test]
    fn test_join_child() {
        assert_eq!(join_child("/", "public"), "/public");
        assert_eq!(join_child("/srv", "public"), "/srv/public");
        assert_eq!(join_child("/srv/", "public"), "/srv/public");
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden("."));
        assert!(is_hidden(".."));
        assert!(is_hidden(".DS_Store"));
        assert!(!is_hidden("file.txt"));
    }
}
