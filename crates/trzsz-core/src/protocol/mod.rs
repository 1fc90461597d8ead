//! Protocol frame and handshake payload definitions.
//!
//! A transfer is a sequence of frames over the interactive byte stream.
//! Each frame is `#<TAG>:<len>\n<payload>`; the payload encoding (text or
//! binary) is fixed by the handshake. See [`codec`] for the wire format.

pub mod codec;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_BUF_SIZE, DEFAULT_TIMEOUT_SECS, PROTOCOL_VERSION};
use crate::error::{Result, TrzszError};
use crate::escape::EscapeTable;

/// The atomic protocol unit tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Client action: confirm/deny plus capabilities.
    Act,
    /// Server config: the negotiated [`TransferConfig`].
    Cfg,
    /// Record count before the first file.
    Num,
    /// File or directory name (relative path in directory mode).
    Name,
    /// Decimal file size.
    Size,
    /// One chunk of file content.
    Data,
    /// Digest of the preceding chunk, or of the whole file.
    Md5,
    /// Positive acknowledgement; payload is a name or "ok".
    Succ,
    /// Negative acknowledgement; aborts the session.
    Fail,
    /// Final summary message; always the last frame on the wire.
    Exit,
    /// Out-of-band error or cancellation.
    Err,
}

impl FrameTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameTag::Act => "ACT",
            FrameTag::Cfg => "CFG",
            FrameTag::Num => "NUM",
            FrameTag::Name => "NAME",
            FrameTag::Size => "SIZE",
            FrameTag::Data => "DATA",
            FrameTag::Md5 => "MD5",
            FrameTag::Succ => "SUCC",
            FrameTag::Fail => "FAIL",
            FrameTag::Exit => "EXIT",
            FrameTag::Err => "ERR",
        }
    }

    pub fn parse(tag: &[u8]) -> Option<FrameTag> {
        match tag {
            b"ACT" => Some(FrameTag::Act),
            b"CFG" => Some(FrameTag::Cfg),
            b"NUM" => Some(FrameTag::Num),
            b"NAME" => Some(FrameTag::Name),
            b"SIZE" => Some(FrameTag::Size),
            b"DATA" => Some(FrameTag::Data),
            b"MD5" => Some(FrameTag::Md5),
            b"SUCC" => Some(FrameTag::Succ),
            b"FAIL" => Some(FrameTag::Fail),
            b"EXIT" => Some(FrameTag::Exit),
            b"ERR" => Some(FrameTag::Err),
            _ => None,
        }
    }
}

/// Line-ending convention of the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewlineMode {
    #[default]
    Lf,
    Crlf,
}

/// Client capabilities and confirmation, sent as the `ACT` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAction {
    pub confirm: bool,
    pub version: String,
    pub support_binary: bool,
    pub support_directory: bool,
    pub platform: String,
}

impl TransferAction {
    /// Build the client-side action for the given remote platform.
    ///
    /// Binary framing is not offered to a Windows remote: its console layer
    /// rewrites the byte stream.
    pub fn new(confirm: bool, remote_is_windows: bool) -> Self {
        Self {
            confirm,
            version: PROTOCOL_VERSION.to_string(),
            support_binary: !remote_is_windows,
            support_directory: true,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// The negotiated transfer configuration, sent as the `CFG` payload and
/// shared by both peers for the rest of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub binary: bool,
    #[serde(default)]
    pub escape_table: EscapeTable,
    pub directory: bool,
    pub overwrite: bool,
    pub max_buf_size: u64,
    pub timeout_secs: u64,
    #[serde(default)]
    pub newline_mode: NewlineMode,
    pub protocol_version: String,
    pub tmux_pane_width: i32,
    pub terminal_columns: u16,
    #[serde(default)]
    pub quiet: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            binary: false,
            escape_table: EscapeTable::none(),
            directory: false,
            overwrite: false,
            max_buf_size: DEFAULT_MAX_BUF_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            newline_mode: NewlineMode::Lf,
            protocol_version: PROTOCOL_VERSION.to_string(),
            tmux_pane_width: -1,
            terminal_columns: 80,
            quiet: false,
        }
    }
}

impl TransferConfig {
    /// Validate the invariants fixed by the handshake.
    pub fn validate(&self) -> Result<()> {
        if self.binary && !self.escape_table.is_empty() {
            return Err(TrzszError::protocol(
                "binary mode must not carry an escape table",
            ));
        }
        if self.max_buf_size == 0 {
            return Err(TrzszError::protocol("max_buf_size must be positive"));
        }
        Ok(())
    }
}

/// Payload of an `ERR` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub trace: bool,
}
