//! tsz binary entry point.

use clap::Parser;

use trzsz_server::{run_send, SendArgs};

fn main() {
    let args = SendArgs::parse();
    if let Err(e) = trzsz_core::init_logging() {
        eprintln!("Failed to initialize logging: {e}");
    }

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let code = rt.block_on(run_send(args));
    std::process::exit(code);
}
