use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Path of `file_path` relative to `root`, joined with forward slashes.
pub fn normalize_rel_path(root: &Path, file_path: &Path) -> Result<String> {
    let rel = file_path.strip_prefix(root).map_err(|_| {
        Error::InvalidFormat(format!(
            "{} is outside {}",
            file_path.display(),
            root.display()
        ))
    })?;
    let out = to_slash(rel);
    if out.is_empty() {
        return Err(Error::InvalidFormat("empty relative path".into()));
    }
    Ok(out)
}

pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        if let Component::Normal(part) = comp {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }
    out.replace('\\', "/")
}

/// Resolve a stored FAT path below `root`.
///
/// Returns `None` for absolute paths and for paths that climb out of `root`.
pub fn safe_join(root: &Path, stored: &str) -> Option<PathBuf> {
    if stored.starts_with('/') {
        return None;
    }
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for part in stored.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            p => {
                // rejects drive prefixes and embedded separators on Windows
                let mut comps = Path::new(p).components();
                match (comps.next(), comps.next()) {
                    (Some(Component::Normal(c)), None) => out.push(c),
                    _ => return None,
                }
                pushed = true;
            }
        }
    }
    pushed.then_some(out)
}
