//! Signal routing for the wrapper.
//!
//! - SIGTERM: terminate the wrapped command and let the bridge wind down.
//! - SIGINT: cancel an active transfer, otherwise pass the interrupt to the
//!   child as a keystroke.
//! - SIGWINCH: propagate the new size to the PTY and any active progress bar.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

use trzsz_core::terminal::terminal_size;

use crate::bridge::BridgeState;
use crate::pty::Pty;

pub fn spawn_signal_handlers(pty: Arc<Pty>, state: Arc<BridgeState>) {
    let pty_term = pty.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
        debug!("SIGTERM, terminating wrapped command");
        pty_term.terminate();
    });

    let pty_int = pty.clone();
    let state_int = state.clone();
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        loop {
            if sigint.recv().await.is_none() {
                return;
            }
            if !state_int.cancel_active() {
                let _ = pty_int.write(&[0x03]).await;
            }
        }
    });

    tokio::spawn(async move {
        let mut sigwinch = match signal(SignalKind::window_change()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGWINCH handler");
                return;
            }
        };
        loop {
            if sigwinch.recv().await.is_none() {
                return;
            }
            let (cols, rows) = terminal_size();
            pty.resize(cols, rows);
            if let Some(progress) = state.progress() {
                progress.set_columns(cols);
            }
        }
    });
}
