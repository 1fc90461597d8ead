//! Escape transform for text-mode payloads.
//!
//! Some bytes do not survive an interactive transport: a multiplexer or a
//! serial layer may interpret or swallow them. The handshake fixes a table
//! mapping each such byte to a two-byte replacement introduced by a leader
//! byte; the transform is applied after base64 encoding and reversed before
//! decoding. Binary mode never escapes.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrzszError};

/// Leader byte introducing every replacement pair.
pub const ESCAPE_LEADER: u8 = 0xEE;

/// Bytes hidden from the transport when the full escape set is requested.
const ESCAPED_BYTES: [u8; 6] = [0x02, 0x0D, 0x10, 0x1B, 0x1D, 0x9D];

/// Per-session mapping of bytes to two-byte replacements.
///
/// The leader always maps to a doubled leader, so the reverse transform is
/// unambiguous: every occurrence of the leader in escaped data starts a pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscapeTable {
    pairs: Vec<(u8, [u8; 2])>,
}

impl EscapeTable {
    /// An empty table: the transform is the identity.
    pub fn none() -> Self {
        Self::default()
    }

    /// The full escape set selected by the `-e` flag.
    pub fn all() -> Self {
        let mut pairs = vec![(ESCAPE_LEADER, [ESCAPE_LEADER, ESCAPE_LEADER])];
        for (i, b) in ESCAPED_BYTES.iter().enumerate() {
            pairs.push((*b, [ESCAPE_LEADER, 0x41 + i as u8]));
        }
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Apply the transform.
    pub fn escape(&self, data: &[u8]) -> Vec<u8> {
        if self.pairs.is_empty() {
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len());
        'bytes: for &b in data {
            for (from, to) in &self.pairs {
                if b == *from {
                    out.extend_from_slice(to);
                    continue 'bytes;
                }
            }
            out.push(b);
        }
        out
    }

    /// Reverse the transform.
    ///
    /// A leader byte with no matching pair, or a truncated trailing pair,
    /// is a protocol error.
    pub fn unescape(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.pairs.is_empty() {
            return Ok(data.to_vec());
        }
        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            if b == ESCAPE_LEADER {
                let next = *data
                    .get(i + 1)
                    .ok_or_else(|| TrzszError::protocol("truncated escape sequence"))?;
                let pair = [ESCAPE_LEADER, next];
                let from = self
                    .pairs
                    .iter()
                    .find(|(_, to)| *to == pair)
                    .map(|(from, _)| *from)
                    .ok_or_else(|| {
                        TrzszError::protocol(format!("unknown escape sequence 0xEE 0x{next:02x}"))
                    })?;
                out.push(from);
                i += 2;
            } else {
                out.push(b);
                i += 1;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_is_identity() {
        let table = EscapeTable::none();
        let data = b"#DATA:5\nhello\n".to_vec();
        assert_eq!(table.escape(&data), data);
        assert_eq!(table.unescape(&data).unwrap(), data);
    }

    #[test]
    fn round_trip_all_byte_values() {
        let table = EscapeTable::all();
        let data: Vec<u8> = (0u8..=255).collect();
        let escaped = table.escape(&data);
        assert_eq!(table.unescape(&escaped).unwrap(), data);
    }

    #[test]
    fn escaped_output_hides_mapped_bytes() {
        let table = EscapeTable::all();
        let escaped = table.escape(&[0x1B, 0x0D, 0x02]);
        assert!(!escaped.contains(&0x1B));
        assert!(!escaped.contains(&0x0D));
        assert!(!escaped.contains(&0x02));
    }

    #[test]
    fn newline_never_appears_in_escaped_payload() {
        use base64::Engine;
        let table = EscapeTable::all();
        let data: Vec<u8> = (0u8..=255).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let escaped = table.escape(encoded.as_bytes());
        assert!(!escaped.contains(&b'\n'));
    }

    #[test]
    fn leader_doubles_itself() {
        let table = EscapeTable::all();
        assert_eq!(table.escape(&[ESCAPE_LEADER]), vec![ESCAPE_LEADER, ESCAPE_LEADER]);
        assert_eq!(
            table.unescape(&[ESCAPE_LEADER, ESCAPE_LEADER]).unwrap(),
            vec![ESCAPE_LEADER]
        );
    }

    #[test]
    fn truncated_pair_is_an_error() {
        let table = EscapeTable::all();
        assert!(table.unescape(&[b'a', ESCAPE_LEADER]).is_err());
    }

    #[test]
    fn unknown_pair_is_an_error() {
        let table = EscapeTable::all();
        assert!(table.unescape(&[ESCAPE_LEADER, 0x7F]).is_err());
    }

    #[test]
    fn table_serializes_for_the_config_frame() {
        let table = EscapeTable::all();
        let json = serde_json::to_string(&table).unwrap();
        let back: EscapeTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
