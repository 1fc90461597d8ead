//! trzsz wrapper binary entry point.

use clap::Parser;
use tracing::info;

use trzsz_core::constants::{EXIT_RAW_MODE_FAILURE, EXIT_SPAWN_FAILURE};
use trzsz_core::terminal::{terminal_size, RawModeGuard};

use trzsz_client::{Bridge, Cli, Pty};

fn main() {
    let code = real_main();
    std::process::exit(code);
}

fn real_main() -> i32 {
    let cli = Cli::parse();

    if let Err(e) = trzsz_core::init_logging() {
        eprintln!("Failed to initialize logging: {e}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "trzsz starting");

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> i32 {
    let (cols, rows) = terminal_size();
    let pty = match Pty::spawn(&cli.command, &cli.args, cols, rows) {
        Ok(pty) => pty,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_SPAWN_FAILURE;
        }
    };

    let _raw = match RawModeGuard::enter() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_RAW_MODE_FAILURE;
        }
    };

    Bridge::new(pty, cli.dragfile).run().await
}
