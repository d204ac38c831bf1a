//! Disk-relative path helpers.
//!
//! Every backend sees paths as `/`-separated strings relative to the disk.
//! A single leading separator is dropped, so `"/a/b"` and `"a/b"` name the
//! same entry. This is a convenience, not a sandbox: `..` components are
//! passed through untouched.

/// Strip one leading `/` from `path`.
pub fn relative(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Normalize a directory argument: relative, without trailing `/`.
///
/// The disk root is the empty string.
pub fn directory(path: &str) -> &str {
    relative(path).trim_end_matches('/')
}

/// Directory prefix for key-based listings: `"a/b/"`, or `""` for the root.
pub fn prefix(dir: &str) -> String {
    let dir = directory(dir);
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

/// Parent directory of a path, `None` when the path is at the root.
pub fn parent(path: &str) -> Option<&str> {
    let path = relative(path).trim_end_matches('/');
    path.rfind('/').map(|idx| &path[..idx])
}

/// Final component of a path.
pub fn file_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}
