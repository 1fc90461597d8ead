//! Trigger-sequence detection in the output stream.
//!
//! The server announces a transfer with
//! `::TRZSZ:TRANSFER:<mode>:<version>[:<id>][:1]` embedded in its terminal
//! output. A small hand-written scanner finds it, extracts the direction and
//! the platform hint, and rewrites `TRZSZ` to `TRZSZGO` in the echoed copy
//! so the server knows a compatible wrapper is present.
//!
//! A marker may straddle two PTY reads, so the detector holds back a tail
//! of bytes that could still grow into a marker and re-scans it joined with
//! the next chunk.

use trzsz_core::constants::{
    MAX_TRIGGER_LEN, TRIGGER_PREFIX, TRIGGER_REWRITE_FROM, TRIGGER_REWRITE_TO,
};

/// Transfer direction announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Server will send files (the user ran `tsz`).
    Send,
    /// Server will receive files (the user ran `trz`).
    Receive,
}

/// A detected trigger marker.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub mode: TriggerMode,
    pub version: String,
    pub remote_is_windows: bool,
}

enum Scan {
    Complete(Trigger),
    Incomplete,
    Invalid,
}

/// Incremental scanner over the output-pump byte stream.
#[derive(Default)]
pub struct TriggerDetector {
    tail: Vec<u8>,
}

impl TriggerDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of PTY output.
    ///
    /// Returns the bytes to forward to the local terminal (with the marker
    /// rewritten when one completed) and the detected trigger, if any.
    /// Bytes held back as a potential marker prefix are re-emitted with the
    /// next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> (Vec<u8>, Option<Trigger>) {
        let mut data = std::mem::take(&mut self.tail);
        data.extend_from_slice(chunk);

        let prefix = TRIGGER_PREFIX.as_bytes();
        let mut search_from = 0;
        while let Some(offset) = find(&data[search_from..], prefix) {
            let idx = search_from + offset;
            match scan_marker(&data[idx..]) {
                Scan::Complete(trigger) => {
                    let mut forward = Vec::with_capacity(data.len() + 2);
                    // `TRZSZ` sits two bytes into the prefix.
                    let rewrite_at = idx + 2;
                    forward.extend_from_slice(&data[..rewrite_at]);
                    forward.extend_from_slice(TRIGGER_REWRITE_TO.as_bytes());
                    forward.extend_from_slice(&data[rewrite_at + TRIGGER_REWRITE_FROM.len()..]);
                    return (forward, Some(trigger));
                }
                Scan::Incomplete => {
                    self.tail = data.split_off(idx);
                    return (data, None);
                }
                Scan::Invalid => {
                    search_from = idx + 1;
                }
            }
        }

        // No full prefix present; a suffix of the data may still be the
        // start of one arriving in the next read.
        let keep = partial_prefix_len(&data, prefix);
        self.tail = data.split_off(data.len() - keep);
        (data, None)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Longest suffix of `data` that is a proper prefix of `pattern`.
fn partial_prefix_len(data: &[u8], pattern: &[u8]) -> usize {
    let max = (pattern.len() - 1).min(data.len());
    for len in (1..=max).rev() {
        if data[data.len() - len..] == pattern[..len] {
            return len;
        }
    }
    0
}

/// Scan a candidate marker starting at the trigger prefix.
fn scan_marker(data: &[u8]) -> Scan {
    debug_assert!(data.starts_with(TRIGGER_PREFIX.as_bytes()));
    let mut i = TRIGGER_PREFIX.len();

    let mode = match data.get(i) {
        None => return Scan::Incomplete,
        Some(b'S') => TriggerMode::Send,
        Some(b'R') => TriggerMode::Receive,
        Some(_) => return Scan::Invalid,
    };
    i += 1;

    match data.get(i) {
        None => return Scan::Incomplete,
        Some(b':') => i += 1,
        Some(_) => return Scan::Invalid,
    }

    // Semver: three digit runs joined by dots.
    let version_start = i;
    for part in 0..3 {
        let run_start = i;
        while matches!(data.get(i), Some(b) if b.is_ascii_digit()) {
            i += 1;
            if i - run_start > 6 {
                return Scan::Invalid;
            }
        }
        if i == run_start {
            return if i >= data.len() {
                Scan::Incomplete
            } else {
                Scan::Invalid
            };
        }
        if part < 2 {
            match data.get(i) {
                None => return Scan::Incomplete,
                Some(b'.') => i += 1,
                Some(_) => return Scan::Invalid,
            }
        }
    }
    let version = String::from_utf8_lossy(&data[version_start..i]).into_owned();

    // Optional `:<digits>` groups: the session id and the platform flag.
    let mut remote_is_windows = false;
    loop {
        match data.get(i) {
            Some(b':') => {}
            // A byte that cannot extend the marker ends it.
            Some(_) => break,
            // The marker may still grow in the next read.
            None => return Scan::Incomplete,
        }
        let run_start = i + 1;
        let mut j = run_start;
        while matches!(data.get(j), Some(b) if b.is_ascii_digit()) {
            j += 1;
            if j - run_start > 16 {
                return Scan::Invalid;
            }
        }
        if j == run_start {
            // ':' not followed by a digit is outside the marker.
            break;
        }
        if j >= data.len() {
            return Scan::Incomplete;
        }
        if &data[run_start..j] == b"1" {
            remote_is_windows = true;
        }
        i = j;
        if i > MAX_TRIGGER_LEN {
            return Scan::Invalid;
        }
    }

    Scan::Complete(Trigger {
        mode,
        version,
        remote_is_windows,
    })
}
