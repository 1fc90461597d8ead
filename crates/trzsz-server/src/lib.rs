//! trzsz-server: the remote-invoked `trz` and `tsz` binaries.
//!
//! Both run on the far end of the interactive connection, announce
//! themselves with the trigger marker and then drive the shared transfer
//! engine over raw stdin/stdout.

pub mod args;
pub mod recv;
pub mod send;
pub mod session;
pub mod tmux;

pub use args::{BaseArgs, RecvArgs, SendArgs};
pub use recv::run_recv;
pub use send::run_send;
