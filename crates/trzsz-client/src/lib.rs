//! trzsz-client: the `trzsz` wrapper.
//!
//! Wraps an interactive command under a PTY and, when the remote side
//! announces a transfer, negotiates it transparently over the same byte
//! stream.

pub mod bridge;
pub mod cli;
pub mod dragfile;
pub mod picker;
pub mod pty;
pub mod signal;
pub mod transfer;
pub mod trigger;

pub use bridge::Bridge;
pub use cli::Cli;
pub use pty::Pty;
pub use trigger::{Trigger, TriggerDetector, TriggerMode};
