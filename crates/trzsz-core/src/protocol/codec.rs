//! Wire codec for trzsz frames.
//!
//! Text mode: `#<TAG>:<len>\n<payload>\n` where `<len>` is the decimal
//! length of the decoded payload and `<payload>` is base64 of the raw bytes
//! run through the session escape table. Binary mode: `#<TAG>:<len>\n`
//! followed by exactly `<len>` raw bytes.
//!
//! The read path re-synchronizes over stray bytes (shells and multiplexers
//! interleave status output with the transfer) by discarding input until the
//! next valid `#<TAG>:<digits>\n` prefix, and tolerates a `\r` before the
//! header newline. Once a full valid header is read, a malformed payload
//! aborts the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::{Result, TrzszError};
use crate::escape::EscapeTable;
use crate::protocol::{FrameTag, NewlineMode};

/// Longest header we accept before declaring the `#` stray: `#` + tag +
/// `:` + 18 length digits + `\r\n`.
const MAX_HEADER_LEN: usize = 28;

/// Encoding state fixed by the handshake.
#[derive(Debug, Clone, Default)]
pub struct CodecMode {
    pub binary: bool,
    pub escape: EscapeTable,
    pub newline: NewlineMode,
}

/// Encode a single frame for the wire.
pub fn encode_frame(tag: FrameTag, payload: &[u8], mode: &CodecMode) -> Bytes {
    let mut buf;
    if mode.binary {
        buf = BytesMut::with_capacity(payload.len() + 16);
        buf.extend_from_slice(format!("#{}:{}\n", tag.as_str(), payload.len()).as_bytes());
        buf.extend_from_slice(payload);
    } else {
        let encoded = BASE64.encode(payload);
        let escaped = mode.escape.escape(encoded.as_bytes());
        buf = BytesMut::with_capacity(escaped.len() + 16);
        buf.extend_from_slice(format!("#{}:{}\n", tag.as_str(), payload.len()).as_bytes());
        buf.extend_from_slice(&escaped);
        buf.extend_from_slice(b"\n");
    }
    buf.freeze()
}

/// Cooperative cancellation for blocked frame reads.
///
/// Cancelling is idempotent: the flag flips once and every waiter wakes.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancelled flag and wake all blocked readers.
    ///
    /// Returns true on the first call only.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled. Resolves immediately if already cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a cancel() landing in
            // between cannot be missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of one decode attempt against the pending buffer.
enum Decoded {
    /// A full frame was consumed.
    Frame(FrameTag, Vec<u8>),
    /// The buffer holds no complete frame yet.
    NeedMore,
}

/// Incremental frame reader over the session's receive queue.
///
/// Single consumer; the producer is the output pump (client side) or the
/// stdin reader (server side). Arrival order is preserved and frame reads
/// consume a contiguous prefix.
pub struct FrameReader {
    rx: mpsc::Receiver<Bytes>,
    pending: BytesMut,
}

impl FrameReader {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: BytesMut::new(),
        }
    }

    /// Read the next frame, waiting up to `timeout` between chunks of
    /// input. `cancel`, when given, aborts a blocked read with `Cancelled`.
    pub async fn read_frame(
        &mut self,
        mode: &CodecMode,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<(FrameTag, Vec<u8>)> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(TrzszError::Cancelled);
            }
        }
        loop {
            match self.try_decode(mode)? {
                Decoded::Frame(tag, payload) => {
                    trace!(tag = tag.as_str(), len = payload.len(), "frame in");
                    return Ok((tag, payload));
                }
                Decoded::NeedMore => self.fill(timeout, cancel).await?,
            }
        }
    }

    /// Wait for more bytes from the queue.
    async fn fill(&mut self, timeout: Duration, cancel: Option<&CancelToken>) -> Result<()> {
        tokio::select! {
            chunk = self.rx.recv() => match chunk {
                Some(bytes) => {
                    self.pending.extend_from_slice(&bytes);
                    Ok(())
                }
                None => Err(TrzszError::protocol("receive queue closed")),
            },
            _ = tokio::time::sleep(timeout) => Err(TrzszError::Timeout),
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            } => Err(TrzszError::Cancelled),
        }
    }

    /// Try to decode one frame from the pending buffer.
    ///
    /// Discards stray bytes up to the next valid header. Only a complete,
    /// valid header commits us to a frame; from there a bad payload is a
    /// hard protocol error.
    fn try_decode(&mut self, mode: &CodecMode) -> Result<Decoded> {
        loop {
            // Drop everything before the next '#'.
            match self.pending.iter().position(|&b| b == b'#') {
                Some(0) => {}
                Some(idx) => self.pending.advance(idx),
                None => {
                    self.pending.clear();
                    return Ok(Decoded::NeedMore);
                }
            }

            let header = match parse_header(&self.pending) {
                HeaderParse::Ok(h) => h,
                HeaderParse::NeedMore => return Ok(Decoded::NeedMore),
                HeaderParse::Invalid => {
                    // Stray '#': drop it and rescan.
                    self.pending.advance(1);
                    continue;
                }
            };

            if mode.binary {
                return self.decode_binary_payload(mode, header);
            }
            return self.decode_text_payload(mode, header);
        }
    }

    fn decode_binary_payload(&mut self, mode: &CodecMode, header: Header) -> Result<Decoded> {
        let mut start = header.end;
        // A CRLF-injecting remote may add a '\r' after the header line.
        if mode.newline == NewlineMode::Crlf
            && self.pending.get(start) == Some(&b'\r')
            && header.len > 0
        {
            start += 1;
        }
        if self.pending.len() < start + header.len {
            return Ok(Decoded::NeedMore);
        }
        self.pending.advance(start);
        let payload = self.pending.split_to(header.len).to_vec();
        Ok(Decoded::Frame(header.tag, payload))
    }

    fn decode_text_payload(&mut self, mode: &CodecMode, header: Header) -> Result<Decoded> {
        let body = &self.pending[header.end..];
        let nl = match body.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => return Ok(Decoded::NeedMore),
        };
        let mut line = &body[..nl];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }

        let unescaped = mode.escape.unescape(line)?;
        let payload = BASE64
            .decode(&unescaped)
            .map_err(|e| TrzszError::protocol(format!("invalid base64 payload: {e}")))?;
        if payload.len() != header.len {
            return Err(TrzszError::protocol(format!(
                "payload length mismatch: declared {}, decoded {}",
                header.len,
                payload.len()
            )));
        }

        self.pending.advance(header.end + nl + 1);
        Ok(Decoded::Frame(header.tag, payload))
    }
}

struct Header {
    tag: FrameTag,
    len: usize,
    /// Offset of the first payload byte within the pending buffer.
    end: usize,
}

enum HeaderParse {
    Ok(Header),
    NeedMore,
    Invalid,
}

/// Parse `#<TAG>:<digits>\n` (optional `\r` before the `\n`) at the start
/// of `buf`.
fn parse_header(buf: &[u8]) -> HeaderParse {
    debug_assert_eq!(buf.first(), Some(&b'#'));

    let mut i = 1;
    while i < buf.len() && (buf[i].is_ascii_uppercase() || buf[i].is_ascii_digit()) {
        i += 1;
        if i > 8 {
            return HeaderParse::Invalid;
        }
    }
    if i == 1 || !buf[1].is_ascii_uppercase() {
        return if i >= buf.len() {
            HeaderParse::NeedMore
        } else {
            HeaderParse::Invalid
        };
    }
    let tag = match FrameTag::parse(&buf[1..i]) {
        Some(tag) => tag,
        None if i >= buf.len() => return HeaderParse::NeedMore,
        None => return HeaderParse::Invalid,
    };
    if i >= buf.len() {
        return HeaderParse::NeedMore;
    }
    if buf[i] != b':' {
        return HeaderParse::Invalid;
    }
    i += 1;

    let digits_start = i;
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return if i >= buf.len() {
            HeaderParse::NeedMore
        } else {
            HeaderParse::Invalid
        };
    }
    if i - digits_start > 18 || i > MAX_HEADER_LEN {
        return HeaderParse::Invalid;
    }
    if i >= buf.len() {
        return HeaderParse::NeedMore;
    }

    let mut end = i;
    if buf[end] == b'\r' {
        end += 1;
        if end >= buf.len() {
            return HeaderParse::NeedMore;
        }
    }
    if buf[end] != b'\n' {
        return HeaderParse::Invalid;
    }

    let len: usize = match std::str::from_utf8(&buf[digits_start..i])
        .ok()
        .and_then(|s| s.parse().ok())
    {
        Some(len) => len,
        None => return HeaderParse::Invalid,
    };

    HeaderParse::Ok(Header {
        tag,
        len,
        end: end + 1,
    })
}
