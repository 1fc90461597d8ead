//! The `trz` flow: the server receives files from the wrapper.

use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

use trzsz_core::constants::{
    EXIT_MUX_DETECT_FAILURE, EXIT_SERVER_RAW_MODE_FAILURE, EXIT_TRANSFER_FAILURE,
    EXIT_UNREADABLE_PATH,
};
use trzsz_core::error::{Result, TrzszError};
use trzsz_core::files::check_path_writable;
use trzsz_core::terminal::RawModeGuard;
use trzsz_core::Transfer;

use crate::args::RecvArgs;
use crate::session::{
    build_config, print_summary, print_trigger, server_error, spawn_server_signals,
    stdio_transfer, unique_id,
};
use crate::tmux::{check_tmux, TmuxContext, TmuxMode};

pub async fn run_recv(args: RecvArgs) -> i32 {
    let dest = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_UNREADABLE_PATH;
        }
    };
    if let Err(e) = check_path_writable(&dest) {
        eprintln!("{e}");
        return EXIT_UNREADABLE_PATH;
    }

    let tmux = match check_tmux() {
        Ok(tmux) => tmux,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_MUX_DETECT_FAILURE;
        }
    };

    let mut binary = args.base.binary;
    if binary && tmux.mode == TmuxMode::Control {
        println!("Binary download in tmux control mode is slower, auto switch to base64 mode.");
        binary = false;
    }

    print_trigger('R', &tmux, unique_id(&tmux));

    let _raw = match RawModeGuard::enter() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_SERVER_RAW_MODE_FAILURE;
        }
    };

    let transfer = stdio_transfer();
    spawn_server_signals(transfer.clone());

    let outcome = std::panic::AssertUnwindSafe(recv_flow(&transfer, &args, &dest, &tmux, binary))
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

    match outcome {
        Ok(message) => {
            drop(_raw);
            print_summary(&message);
            0
        }
        Err(err) => {
            server_error(&transfer, &err).await;
            drop(_raw);
            eprintln!("\x1b8\x1b[0J{}", err.user_message());
            EXIT_TRANSFER_FAILURE
        }
    }
}

async fn recv_flow(
    transfer: &Arc<Transfer>,
    args: &RecvArgs,
    dest: &PathBuf,
    tmux: &TmuxContext,
    binary: bool,
) -> Result<String> {
    let action = transfer.recv_action().await?;
    if !action.confirm {
        return Ok("Cancelled".to_string());
    }

    let binary = binary && action.support_binary;
    if args.base.directory && !action.support_directory {
        return Err(TrzszError::protocol(
            "The client doesn't support transfer directory",
        ));
    }

    transfer
        .send_config(build_config(&args.base, binary, tmux))
        .await?;

    let names = transfer.recv_files(dest, None).await?;
    info!(files = names.len(), dest = %dest.display(), "all files received");

    // The wrapper reports what it sent.
    transfer.recv_exit().await
}
