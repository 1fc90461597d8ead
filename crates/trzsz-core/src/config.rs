//! `~/.trzsz.conf` parsing.
//!
//! Line-oriented `key = value`; unknown keys are ignored and a missing file
//! is not an error.

use std::path::{Path, PathBuf};

/// Key naming the default directory for downloads.
pub const DEFAULT_DOWNLOAD_PATH: &str = "DefaultDownloadPath";

/// Key naming the default directory offered when choosing uploads.
pub const DEFAULT_UPLOAD_PATH: &str = "DefaultUploadPath";

/// Look up `key` in `~/.trzsz.conf`.
///
/// Returns `None` when the home directory is unknown, the file is missing,
/// the key is absent, or its value is empty.
pub fn get_config(key: &str) -> Option<String> {
    let path = dirs::home_dir()?.join(".trzsz.conf");
    get_config_from(&path, key)
}

fn get_config_from(path: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines() {
        let Some(idx) = line.find('=') else {
            continue;
        };
        if line[..idx].trim() == key {
            let value = line[idx + 1..].trim();
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Convenience: the configured path for `key`, as a `PathBuf`.
pub fn get_config_path(key: &str) -> Option<PathBuf> {
    get_config(key).map(PathBuf::from)
}
