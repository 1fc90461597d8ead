//! Download-directory and upload-file selection.
//!
//! `~/.trzsz.conf` keys win; otherwise a native dialog is shown. A
//! cancelled dialog declines the transfer, which the caller turns into
//! `ACT{confirm=false}`.

use std::path::PathBuf;

use trzsz_core::config::{get_config_path, DEFAULT_DOWNLOAD_PATH, DEFAULT_UPLOAD_PATH};

/// Choose the directory incoming files are saved to.
///
/// Returns `None` when the user cancels the dialog.
pub async fn choose_download_path() -> Option<PathBuf> {
    if let Some(path) = get_config_path(DEFAULT_DOWNLOAD_PATH) {
        return Some(path);
    }
    tokio::task::spawn_blocking(|| {
        rfd::FileDialog::new()
            .set_title("Choose a folder to save file(s)")
            .pick_folder()
    })
    .await
    .ok()
    .flatten()
}

/// Choose the local files to upload.
///
/// Returns `None` when the user cancels the dialog.
pub async fn choose_upload_files() -> Option<Vec<PathBuf>> {
    let start_dir = get_config_path(DEFAULT_UPLOAD_PATH);
    let files = tokio::task::spawn_blocking(move || {
        let mut dialog = rfd::FileDialog::new().set_title("Choose some files to send");
        if let Some(dir) = start_dir {
            dialog = dialog.set_directory(dir);
        }
        dialog.pick_files()
    })
    .await
    .ok()
    .flatten()?;
    if files.is_empty() {
        None
    } else {
        Some(files)
    }
}
