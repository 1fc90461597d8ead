//! Client-side transfer orchestration.
//!
//! Started by the output pump on trigger detection; runs the download or
//! upload flow against the engine and tears the session down on every exit
//! path. The task body is wrapped in a panic catch so an unexpected failure
//! still reaches the peer as an `ERR` frame.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};

use trzsz_core::error::{Result, TrzszError};
use trzsz_core::files::{check_path_writable, check_paths_readable};
use trzsz_core::progress::{ProgressListener, TransferProgress};
use trzsz_core::terminal::terminal_columns;
use trzsz_core::{Transfer, TransferConfig};

use crate::bridge::BridgeState;
use crate::picker::{choose_download_path, choose_upload_files};
use crate::trigger::{Trigger, TriggerMode};

/// Run one transfer session to completion and clear the global state.
pub async fn handle_transfer(state: Arc<BridgeState>, trigger: Trigger, transfer: Arc<Transfer>) {
    let outcome = std::panic::AssertUnwindSafe(run_transfer(&state, &trigger, &transfer))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let trace = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TrzszError::Panic { trace })
        });

    if let Err(err) = &outcome {
        error!(error = %err, "transfer failed");
        transfer.send_error(err).await;
        // The server terminates the wire with EXIT; drain to it so no
        // protocol bytes leak to the terminal after the blackout ends.
        let _ = transfer.drain_until_exit().await;
    }

    if let Some(progress) = state.take_progress() {
        progress.finish();
    }
    state.clear_session();

    if let Err(err) = &outcome {
        // Exactly one user-facing line, after the blackout ends.
        eprint!("\r\n{}\r\n", err.user_message());
    }
}

async fn run_transfer(
    state: &Arc<BridgeState>,
    trigger: &Trigger,
    transfer: &Arc<Transfer>,
) -> Result<()> {
    match trigger.mode {
        TriggerMode::Send => download_files(state, trigger, transfer).await,
        TriggerMode::Receive => upload_files(state, trigger, transfer).await,
    }
}

/// The server is sending: choose a directory and receive into it.
async fn download_files(
    state: &Arc<BridgeState>,
    trigger: &Trigger,
    transfer: &Arc<Transfer>,
) -> Result<()> {
    let Some(path) = choose_download_path().await else {
        return transfer.send_action(false, trigger.remote_is_windows).await;
    };
    check_path_writable(&path)?;

    transfer.send_action(true, trigger.remote_is_windows).await?;
    let config = transfer.recv_config().await?;
    let progress = make_progress(state, &config);

    let names = transfer
        .recv_files(&path, progress_listener(&progress))
        .await?;
    info!(files = names.len(), dest = %path.display(), "download complete");

    transfer
        .send_exit(&format!("Saved {} to {}", names.join(", "), path.display()))
        .await
}

/// The server is receiving: choose local files and send them.
async fn upload_files(
    state: &Arc<BridgeState>,
    trigger: &Trigger,
    transfer: &Arc<Transfer>,
) -> Result<()> {
    let dragged = state.take_drag_files();
    let files = if dragged.is_empty() {
        match choose_upload_files().await {
            Some(files) => files,
            None => {
                return transfer.send_action(false, trigger.remote_is_windows).await;
            }
        }
    } else {
        dragged.files
    };
    let records = check_paths_readable(&files, false)?;

    transfer.send_action(true, trigger.remote_is_windows).await?;
    let config = transfer.recv_config().await?;
    let progress = make_progress(state, &config);

    let names = transfer
        .send_files(&records, progress_listener(&progress))
        .await?;
    info!(files = names.len(), "upload complete");

    transfer
        .send_exit(&format!("Received {}", names.join(", ")))
        .await
}

/// Progress is absent entirely when the session is quiet.
fn make_progress(state: &Arc<BridgeState>, config: &TransferConfig) -> Option<Arc<TransferProgress>> {
    if config.quiet {
        return None;
    }
    let progress = Arc::new(TransferProgress::new(
        terminal_columns(),
        config.tmux_pane_width,
    ));
    state.set_progress(progress.clone());
    Some(progress)
}

fn progress_listener(progress: &Option<Arc<TransferProgress>>) -> Option<&dyn ProgressListener> {
    progress.as_ref().map(|p| p.as_ref() as &dyn ProgressListener)
}
