//! Object key handling
//!
//! Keys always use `/` and never start with one. This module is the single
//! place where host paths are turned into keys and back.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Key separator
pub const SEPARATOR: char = '/';

/// Normalize a prefix to end with exactly one `/` and have no leading `/`.
///
/// The empty prefix (whole bucket) stays empty. With the trailing separator in
/// place `"a/"` can no longer match `"ab/file"`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}", trimmed, SEPARATOR)
    }
}

/// Join a normalized prefix and a relative key
pub fn join_key(prefix: &str, relative: &str) -> String {
    format!("{}{}", prefix, relative)
}

/// Strip a normalized prefix from a full key.
///
/// Returns `None` if the key is not under the prefix.
pub fn strip_key_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

/// Convert a path under `root` into a relative key
pub fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::invalid_key(
            path.display().to_string(),
            format!("not under {}", root.display()),
        )
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::invalid_key(path.display().to_string(), "path is not valid UTF-8")
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(Error::invalid_key(
                    path.display().to_string(),
                    "unexpected path component",
                ))
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::invalid_key(
            path.display().to_string(),
            "path is the root itself",
        ));
    }

    Ok(parts.join("/"))
}

/// Resolve a relative key to a path under `root`, refusing anything that
/// would land outside of it.
pub fn local_path(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(Error::invalid_key(relative, "empty key"));
    }
    if relative.starts_with(SEPARATOR) {
        return Err(Error::invalid_key(relative, "absolute key"));
    }

    let mut path = root.to_path_buf();
    for segment in relative.split(SEPARATOR) {
        match segment {
            "" => return Err(Error::invalid_key(relative, "empty path segment")),
            "." | ".." => return Err(Error::invalid_key(relative, "relative path segment")),
            s if s.contains(std::path::MAIN_SEPARATOR) => {
                return Err(Error::invalid_key(relative, "host separator in key"))
            }
            s => path.push(s),
        }
    }
    Ok(path)
}
