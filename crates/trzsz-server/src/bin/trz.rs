//! trz binary entry point.

use clap::Parser;

use trzsz_server::{run_recv, RecvArgs};

fn main() {
    let args = RecvArgs::parse();
    if let Err(e) = trzsz_core::init_logging() {
        eprintln!("Failed to initialize logging: {e}");
    }

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let code = rt.block_on(run_recv(args));
    std::process::exit(code);
}
