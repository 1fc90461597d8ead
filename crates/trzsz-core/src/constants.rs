//! Protocol and configuration constants for trzsz.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Current protocol version (semver, exchanged during the handshake).
pub const PROTOCOL_VERSION: &str = "1.1.0";

/// ASCII sentinel the server emits to announce a transfer.
pub const TRIGGER_PREFIX: &str = "::TRZSZ:TRANSFER:";

/// Substring rewritten in the echoed trigger to acknowledge compatibility.
pub const TRIGGER_REWRITE_FROM: &str = "TRZSZ";
pub const TRIGGER_REWRITE_TO: &str = "TRZSZGO";

/// Upper bound on a full trigger marker: prefix, mode, semver, 13-digit id
/// and the platform flag. Used to size the cross-read tail buffer.
pub const MAX_TRIGGER_LEN: usize = 64;

/// Maximum per-chunk payload ceiling (10 MiB).
pub const DEFAULT_MAX_BUF_SIZE: u64 = 10 * 1024 * 1024;

/// Initial chunk size for text-mode slow start.
pub const INITIAL_CHUNK_SIZE: u64 = 1024;

/// Idle-read timeout before a frame read raises `Timeout`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

// =============================================================================
// Stream Bridge Constants
// =============================================================================

/// Rotating read buffer size for the input and output pumps.
pub const PUMP_BUF_SIZE: usize = 10240;

/// Capacity of the byte channels between pumps and the transfer engine.
pub const BYTE_CHANNEL_CAP: usize = 256;

/// Grace period for the peer to drain our final frames before teardown.
pub const FLUSH_GRACE: Duration = Duration::from_millis(100);

// =============================================================================
// Exit Codes
// =============================================================================

/// Wrapper: failed to spawn the child command.
pub const EXIT_SPAWN_FAILURE: i32 = -1;
/// Wrapper and server: failed to put the terminal into raw mode.
pub const EXIT_RAW_MODE_FAILURE: i32 = -2;
/// Server: a source path is missing or unreadable.
pub const EXIT_UNREADABLE_PATH: i32 = -1;
/// Server: two sources would land at the same target name.
pub const EXIT_DUPLICATE_TARGET: i32 = -2;
/// Server: multiplexer detection failed.
pub const EXIT_MUX_DETECT_FAILURE: i32 = -3;
/// Server: raw-mode failure.
pub const EXIT_SERVER_RAW_MODE_FAILURE: i32 = -4;
/// Any side: the transfer itself failed.
pub const EXIT_TRANSFER_FAILURE: i32 = -1;
