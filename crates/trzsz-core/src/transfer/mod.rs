//! The transfer protocol state machine.
//!
//! A [`Transfer`] owns one side of an active session: the frame reader over
//! the receive queue, the outgoing byte channel, the negotiated config and
//! the cancellation token. The handshake, sender loop and receiver loop are
//! implemented in the submodules; both the wrapper and the remote binaries
//! drive the same engine.

mod handshake;
mod receiver;
mod sender;

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::FLUSH_GRACE;
use crate::error::{Result, TrzszError};
use crate::protocol::codec::{encode_frame, CancelToken, CodecMode, FrameReader};
use crate::protocol::{ErrorPayload, FrameTag, NewlineMode, TransferConfig};

pub use crate::protocol::codec::CancelToken as TransferCancelToken;

/// One side of an active transfer session.
pub struct Transfer {
    outgoing: mpsc::Sender<Bytes>,
    reader: tokio::sync::Mutex<FrameReader>,
    mode: Mutex<CodecMode>,
    config: Mutex<TransferConfig>,
    cancel: CancelToken,
}

impl Transfer {
    /// Create a session over a pair of byte channels.
    ///
    /// `incoming` is filled by the single producer owning the underlying
    /// stream's read side (output pump or stdin reader); frames written by
    /// the engine are drained from `outgoing` by the stream's write side.
    pub fn new(incoming: mpsc::Receiver<Bytes>, outgoing: mpsc::Sender<Bytes>) -> Self {
        Self {
            outgoing,
            reader: tokio::sync::Mutex::new(FrameReader::new(incoming)),
            mode: Mutex::new(CodecMode::default()),
            config: Mutex::new(TransferConfig::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Create a session whose remote injects CRLF line endings.
    pub fn with_remote_newline(
        incoming: mpsc::Receiver<Bytes>,
        outgoing: mpsc::Sender<Bytes>,
        newline: NewlineMode,
    ) -> Self {
        let transfer = Self::new(incoming, outgoing);
        transfer.mode.lock().unwrap().newline = newline;
        transfer
    }

    /// Snapshot of the negotiated configuration.
    pub fn config(&self) -> TransferConfig {
        self.config.lock().unwrap().clone()
    }

    /// Fix the codec and timeouts from the exchanged configuration.
    pub(crate) fn apply_config(&self, config: TransferConfig) -> Result<()> {
        config.validate()?;
        {
            let mut mode = self.mode.lock().unwrap();
            mode.binary = config.binary;
            mode.escape = config.escape_table.clone();
            mode.newline = config.newline_mode;
        }
        *self.config.lock().unwrap() = config;
        Ok(())
    }

    fn mode(&self) -> CodecMode {
        self.mode.lock().unwrap().clone()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.lock().unwrap().timeout_secs)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Stop the transfer from the local side.
    ///
    /// Idempotent: sets the cancelled flag and wakes any blocked frame
    /// read with `Cancelled`; the engine task then emits a single `ERR`
    /// frame and tears down.
    pub fn cancel(&self) -> bool {
        let first = self.cancel.cancel();
        if first {
            debug!("transfer cancelled");
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // =========================================================================
    // Frame I/O
    // =========================================================================

    /// Write one frame to the peer.
    pub async fn send_frame(&self, tag: FrameTag, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(tag, payload, &self.mode());
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| TrzszError::protocol("stream write side closed"))
    }

    /// Read the next frame, honoring the idle timeout and cancellation.
    pub async fn recv_frame(&self) -> Result<(FrameTag, Vec<u8>)> {
        let mode = self.mode();
        let timeout = self.timeout();
        let mut reader = self.reader.lock().await;
        reader.read_frame(&mode, timeout, Some(&self.cancel)).await
    }

    /// Read a frame and require the given tag.
    ///
    /// A `FAIL` or `ERR` frame from the peer is surfaced as the matching
    /// error; any other tag is a protocol mismatch.
    pub async fn recv_expect(&self, want: FrameTag) -> Result<Vec<u8>> {
        let (tag, payload) = self.recv_frame().await?;
        if tag == want {
            return Ok(payload);
        }
        match tag {
            FrameTag::Fail => Err(TrzszError::Fail(
                String::from_utf8_lossy(&payload).into_owned(),
            )),
            FrameTag::Err => {
                let err: ErrorPayload = serde_json::from_slice(&payload)
                    .map_err(|e| TrzszError::protocol(format!("malformed ERR payload: {e}")))?;
                Err(TrzszError::Remote {
                    kind: err.kind,
                    message: err.message,
                    trace: err.trace,
                })
            }
            other => Err(TrzszError::protocol(format!(
                "expected {} frame, got {}",
                want.as_str(),
                other.as_str()
            ))),
        }
    }

    /// Read a `SUCC` acknowledgement and return its payload as text.
    pub async fn recv_succ(&self) -> Result<String> {
        let payload = self.recv_expect(FrameTag::Succ).await?;
        String::from_utf8(payload)
            .map_err(|_| TrzszError::protocol("SUCC payload is not valid UTF-8"))
    }

    fn utf8(payload: Vec<u8>, what: &str) -> Result<String> {
        String::from_utf8(payload)
            .map_err(|_| TrzszError::protocol(format!("{what} payload is not valid UTF-8")))
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Send the final summary and give the peer a moment to drain it.
    pub async fn send_exit(&self, message: &str) -> Result<()> {
        self.send_frame(FrameTag::Exit, message.as_bytes()).await?;
        tokio::time::sleep(FLUSH_GRACE).await;
        Ok(())
    }

    /// Wait for the peer's final summary.
    pub async fn recv_exit(&self) -> Result<String> {
        let payload = self.recv_expect(FrameTag::Exit).await?;
        Self::utf8(payload, "EXIT")
    }

    /// Report an error to the peer as an `ERR` frame.
    ///
    /// Remote-originated errors are never echoed back.
    pub async fn send_error(&self, err: &TrzszError) {
        if err.is_remote() {
            return;
        }
        let payload = ErrorPayload {
            kind: err.kind().to_string(),
            message: match err {
                TrzszError::Cancelled => "interrupted".to_string(),
                other => other.to_string(),
            },
            trace: err.is_traced(),
        };
        if let Ok(json) = serde_json::to_vec(&payload) {
            let _ = self.send_frame(FrameTag::Err, &json).await;
        }
    }

    /// Discard frames until the peer's `EXIT` arrives or the stream goes
    /// quiet. Pending acknowledgements are dropped on the floor.
    ///
    /// Used after an error or cancellation so no protocol bytes are left in
    /// the stream when the session ends.
    pub async fn drain_until_exit(&self) -> Option<String> {
        let mode = self.mode();
        let timeout = self.timeout();
        let mut reader = self.reader.lock().await;
        loop {
            // Cancellation must not abort the drain, so no token here.
            match reader.read_frame(&mode, timeout, None).await {
                Ok((FrameTag::Exit, payload)) => {
                    return String::from_utf8(payload).ok();
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Encode an MD5 digest for the wire: hex in text mode, raw in binary.
fn encode_digest(digest: &md5::Digest, binary: bool) -> Vec<u8> {
    if binary {
        digest.0.to_vec()
    } else {
        format!("{digest:x}").into_bytes()
    }
}

/// Decode an MD5 digest from an `MD5` frame payload.
fn decode_digest(payload: &[u8], binary: bool) -> Result<[u8; 16]> {
    if binary {
        payload
            .try_into()
            .map_err(|_| TrzszError::protocol("binary MD5 payload must be 16 bytes"))
    } else {
        let text = std::str::from_utf8(payload)
            .map_err(|_| TrzszError::protocol("MD5 payload is not valid UTF-8"))?;
        if text.len() != 32 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TrzszError::protocol("MD5 payload must be 32 hex digits"));
        }
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16)
                .map_err(|_| TrzszError::protocol("MD5 payload is not valid hex"))?;
        }
        Ok(out)
    }
}
