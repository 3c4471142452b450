use std::path::{Component, Path, PathBuf};

/// True when a pattern already names an absolute location: a Unix root or a
/// Windows drive root such as `C:\` or `C:/`.
pub fn is_absolute_pattern(pattern: &str) -> bool {
    if pattern.starts_with('/') {
        return true;
    }
    let bytes = pattern.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Resolve watch patterns into absolute, de-duplicated paths.
///
/// Relative patterns are joined onto `cwd`. Each result is canonicalized so
/// that symlinks and `.`/`..` segments collapse to one identity; a path that
/// does not exist yet is normalized lexically instead and left for setup to
/// report. Order of first appearance is kept.
pub fn resolve<S: AsRef<str>>(patterns: &[S], cwd: &Path) -> Vec<PathBuf> {
    let mut resolved: Vec<PathBuf> = Vec::with_capacity(patterns.len());

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let mut joined = if is_absolute_pattern(pattern) {
            PathBuf::from(pattern)
        } else {
            cwd.join(pattern)
        };
        // A drive-letter pattern is still relative on Unix.
        if !joined.is_absolute() {
            joined = cwd.join(joined);
        }

        let path = std::fs::canonicalize(&joined).unwrap_or_else(|_| normalize(&joined));
        if !resolved.contains(&path) {
            resolved.push(path);
        }
    }

    resolved
}

/// Lexically drop `.` segments and fold `..` into their parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
