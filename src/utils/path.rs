use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// Expand a leading `~/` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE"));
        if let Some(home) = home {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Comparison form of a root: forward slashes, no trailing slash, lowercase.
pub fn normalize_root(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() && raw.starts_with('/') {
        return "/".to_string();
    }
    trimmed.to_lowercase()
}

pub fn same_root(a: &Path, b: &Path) -> bool {
    normalize_root(a) == normalize_root(b)
}

/// Drop roots that name the same directory as an earlier one.
pub fn dedup_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    roots
        .iter()
        .filter(|root| seen.insert(normalize_root(root)))
        .cloned()
        .collect()
}

/// Last path segment as a string, or empty.
pub fn last_segment(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
