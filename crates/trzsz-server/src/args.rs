//! Argument parsing for the remote-invoked binaries.

use std::path::PathBuf;

use clap::Parser;

use trzsz_core::constants::{DEFAULT_MAX_BUF_SIZE, DEFAULT_TIMEOUT_SECS};

/// Flags shared by `trz` and `tsz`.
#[derive(Debug, Clone, clap::Args)]
pub struct BaseArgs {
    /// Quiet mode, hide the progress bar
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Binary transfer mode, faster for binary files
    #[arg(short = 'b', long)]
    pub binary: bool,

    /// Escape all known control characters
    #[arg(short = 'e', long)]
    pub escape: bool,

    /// Transfer directories and their contents
    #[arg(short = 'd', long)]
    pub directory: bool,

    /// Overwrite existing file(s) instead of renaming
    #[arg(short = 'y', long)]
    pub overwrite: bool,

    /// Maximum chunk size in bytes
    #[arg(short = 'B', long = "bufsize", default_value_t = DEFAULT_MAX_BUF_SIZE)]
    pub bufsize: u64,

    /// Timeout in seconds for each reply
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

/// Send file(s), similar to sz and compatible with tmux.
#[derive(Debug, Parser)]
#[command(
    name = "tsz",
    version,
    about = "Send file(s), similar to sz and compatible with tmux"
)]
pub struct SendArgs {
    #[command(flatten)]
    pub base: BaseArgs,

    /// File(s) to be sent
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Receive file(s), similar to rz and compatible with tmux.
#[derive(Debug, Parser)]
#[command(
    name = "trz",
    version,
    about = "Receive file(s), similar to rz and compatible with tmux"
)]
pub struct RecvArgs {
    #[command(flatten)]
    pub base: BaseArgs,
}
