//! Server-side session plumbing over raw stdin/stdout.
//!
//! The remote binaries own the controlling terminal directly: stdin bytes
//! feed the engine's receive queue, engine frames are written to stdout.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use trzsz_core::constants::{BYTE_CHANNEL_CAP, PROTOCOL_VERSION, PUMP_BUF_SIZE};
use trzsz_core::error::TrzszError;
use trzsz_core::terminal::terminal_columns;
use trzsz_core::Transfer;

use crate::args::BaseArgs;
use crate::tmux::{TmuxContext, TmuxMode};

/// Build a transfer session over this process's stdin/stdout.
pub fn stdio_transfer() -> Arc<Transfer> {
    let (feed_tx, feed_rx) = mpsc::channel(BYTE_CHANNEL_CAP);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(BYTE_CHANNEL_CAP);

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; PUMP_BUF_SIZE];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if feed_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("stdin reader ended");
    });

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(bytes) = out_rx.recv().await {
            if stdout.write_all(&bytes).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    Arc::new(Transfer::new(feed_rx, out_tx))
}

/// Cancel the transfer on SIGINT or SIGTERM.
pub fn spawn_server_signals(transfer: Arc<Transfer>) {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
        let transfer = transfer.clone();
        tokio::spawn(async move {
            let mut sig = match signal(kind) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!(error = %e, "failed to install signal handler");
                    return;
                }
            };
            loop {
                if sig.recv().await.is_none() {
                    return;
                }
                transfer.cancel();
            }
        });
    }
}

/// Compose the session config from the CLI flags and the environment.
pub fn build_config(
    args: &BaseArgs,
    binary: bool,
    tmux: &TmuxContext,
) -> trzsz_core::TransferConfig {
    trzsz_core::TransferConfig {
        binary,
        escape_table: if !binary && args.escape {
            trzsz_core::escape::EscapeTable::all()
        } else {
            trzsz_core::escape::EscapeTable::none()
        },
        directory: args.directory,
        overwrite: args.overwrite,
        max_buf_size: args.bufsize,
        timeout_secs: args.timeout,
        newline_mode: trzsz_core::NewlineMode::Lf,
        protocol_version: PROTOCOL_VERSION.to_string(),
        tmux_pane_width: tmux.pane_width,
        terminal_columns: terminal_columns(),
        quiet: args.quiet,
    }
}

/// The 13-digit session id embedded in the trigger marker.
///
/// Derived from unix milliseconds; the low two digits encode the
/// environment (20 = running under an attached tmux client).
pub fn unique_id(tmux: &TmuxContext) -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut id = (millis % 100_000_000_000) * 100;
    if tmux.mode == TmuxMode::Normal {
        id += 20;
    }
    id
}

/// Emit the trigger marker announcing this transfer.
///
/// Under an attached tmux client, first reserve rows below the cursor so
/// the progress bar does not scroll the pane.
pub fn print_trigger(mode: char, tmux: &TmuxContext, id: u64) {
    use std::io::Write;

    let mut stdout = std::io::stdout();
    if tmux.mode == TmuxMode::Normal {
        let columns = terminal_columns();
        if columns > 0 && columns < 40 {
            let _ = stdout.write_all(b"\n\n\x1b[2A\x1b[0J");
        } else {
            let _ = stdout.write_all(b"\n\x1b[1A\x1b[0J");
        }
    }
    let _ = write!(
        stdout,
        "\x1b7\x07::TRZSZ:TRANSFER:{mode}:{PROTOCOL_VERSION}:{id:013}\r\n"
    );
    let _ = stdout.flush();
}

/// Restore the saved cursor and print the final line after raw mode ends.
pub fn print_summary(message: &str) {
    println!("\x1b8\x1b[0J{message}");
}

/// Report a failed transfer: notify the peer, terminate the wire with
/// `EXIT` so the client's drain completes, and print one line locally.
pub async fn server_error(transfer: &Transfer, err: &TrzszError) {
    transfer.send_error(err).await;
    let _ = transfer.send_exit(&err.user_message()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::TmuxMode;

    fn no_tmux() -> TmuxContext {
        TmuxContext {
            mode: TmuxMode::None,
            pane_width: -1,
        }
    }

    #[test]
    fn unique_id_is_13_digits() {
        let id = unique_id(&no_tmux());
        assert!(id < 10_000_000_000_000);
        assert_eq!(format!("{id:013}").len(), 13);
        assert_eq!(id % 100, 0);
    }

    #[test]
    fn unique_id_encodes_tmux() {
        let tmux = TmuxContext {
            mode: TmuxMode::Normal,
            pane_width: 80,
        };
        assert_eq!(unique_id(&tmux) % 100, 20);
    }

    #[test]
    fn config_carries_flags() {
        let args = BaseArgs {
            quiet: true,
            binary: false,
            escape: true,
            directory: true,
            overwrite: false,
            bufsize: 1024,
            timeout: 5,
        };
        let config = build_config(&args, false, &no_tmux());
        assert!(config.quiet);
        assert!(config.directory);
        assert!(!config.escape_table.is_empty());
        assert_eq!(config.max_buf_size, 1024);
        assert_eq!(config.timeout_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn binary_config_never_escapes() {
        let args = BaseArgs {
            quiet: false,
            binary: true,
            escape: true,
            directory: false,
            overwrite: false,
            bufsize: 1024,
            timeout: 5,
        };
        let config = build_config(&args, true, &no_tmux());
        assert!(config.binary);
        assert!(config.escape_table.is_empty());
        assert!(config.validate().is_ok());
    }
}
