//! trzsz-core: Shared protocol engine for trzsz.
//!
//! This crate provides:
//! - Frame definitions and the text/binary wire codec
//! - The transfer state machine (handshake, per-file loop, termination)
//! - Path and file resolution with receiver-side unique naming
//! - Progress reporting
//! - Terminal raw-mode handling
//! - Configuration file parsing and logging setup

pub mod config;
pub mod constants;
pub mod error;
pub mod escape;
pub mod files;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod terminal;
pub mod transfer;

pub use error::{Result, TrzszError};
pub use logging::init_logging;
pub use protocol::{NewlineMode, TransferAction, TransferConfig};
pub use transfer::Transfer;
