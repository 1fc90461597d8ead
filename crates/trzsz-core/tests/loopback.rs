//! End-to-end transfer scenarios over an in-process engine pair.
//!
//! Two `Transfer` instances are wired together with crossed byte channels,
//! with a tap on each direction recording the raw wire bytes for frame-order
//! assertions.

use std::fs;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use trzsz_core::error::TrzszError;
use trzsz_core::escape::EscapeTable;
use trzsz_core::files::check_paths_readable;
use trzsz_core::protocol::FrameTag;
use trzsz_core::{Transfer, TransferConfig};

/// Raw bytes recorded from one direction of the wire.
#[derive(Clone, Default)]
struct Tap {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Tap {
    fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    /// Frame `(tag, declared_len)` pairs in wire order.
    ///
    /// Parses headers as strictly as the codec does, so stray bytes (or
    /// binary payload bytes that happen to contain `#`) are skipped rather
    /// than misread.
    fn frames(&self, binary: bool) -> Vec<(String, usize)> {
        const TAGS: [&str; 11] = [
            "ACT", "CFG", "NUM", "NAME", "SIZE", "DATA", "MD5", "SUCC", "FAIL", "EXIT", "ERR",
        ];
        let data = self.snapshot();
        let mut frames = Vec::new();
        let mut i = 0;
        'scan: while i < data.len() {
            if data[i] != b'#' {
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < data.len() && (data[j].is_ascii_uppercase() || data[j].is_ascii_digit()) {
                j += 1;
            }
            let tag = String::from_utf8_lossy(&data[i + 1..j]).into_owned();
            if !TAGS.contains(&tag.as_str()) || data.get(j) != Some(&b':') {
                i += 1;
                continue;
            }
            let digits_start = j + 1;
            let mut k = digits_start;
            while k < data.len() && data[k].is_ascii_digit() {
                k += 1;
            }
            let Ok(len) = std::str::from_utf8(&data[digits_start..k]).unwrap().parse() else {
                i += 1;
                continue;
            };
            if data.get(k) == Some(&b'\r') {
                k += 1;
            }
            if data.get(k) != Some(&b'\n') {
                i += 1;
                continue;
            }
            let header_end = k + 1;
            if binary {
                i = header_end + len;
            } else {
                let Some(payload_nl) = data[header_end..].iter().position(|&b| b == b'\n') else {
                    break 'scan;
                };
                i = header_end + payload_nl + 1;
            }
            frames.push((tag, len));
        }
        frames
    }

    fn tags(&self, binary: bool) -> Vec<String> {
        self.frames(binary).into_iter().map(|(tag, _)| tag).collect()
    }
}

/// A connected client/server pair plus taps on both directions.
fn tapped_pair() -> (Arc<Transfer>, Arc<Transfer>, Tap, Tap) {
    let (c_out_tx, c_out_rx) = mpsc::channel::<Bytes>(1024);
    let (s_out_tx, s_out_rx) = mpsc::channel::<Bytes>(1024);
    let (c_feed_tx, c_feed_rx) = mpsc::channel::<Bytes>(1024);
    let (s_feed_tx, s_feed_rx) = mpsc::channel::<Bytes>(1024);

    let c2s_tap = Tap::default();
    let s2c_tap = Tap::default();
    forward(c_out_rx, s_feed_tx, c2s_tap.clone());
    forward(s_out_rx, c_feed_tx, s2c_tap.clone());

    let client = Arc::new(Transfer::new(c_feed_rx, c_out_tx));
    let server = Arc::new(Transfer::new(s_feed_rx, s_out_tx));
    (client, server, c2s_tap, s2c_tap)
}

fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn forward(mut rx: mpsc::Receiver<Bytes>, tx: mpsc::Sender<Bytes>, tap: Tap) {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            tap.bytes.lock().unwrap().extend_from_slice(&bytes);
            if tx.send(bytes).await.is_err() {
                break;
            }
        }
    });
}

async fn handshake(
    client: &Arc<Transfer>,
    server: &Arc<Transfer>,
    config: TransferConfig,
) -> TransferConfig {
    let client = client.clone();
    let confirm = tokio::spawn(async move {
        client.send_action(true, false).await.unwrap();
        client.recv_config().await.unwrap()
    });
    let action = server.recv_action().await.unwrap();
    assert!(action.confirm);
    server.send_config(config).await.unwrap();
    confirm.await.unwrap()
}

// =============================================================================
// Scenario: single small file, text mode, empty escape table
// =============================================================================

#[tokio::test]
async fn text_mode_single_file_upload() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.txt"), b"hello").unwrap();
    let records = check_paths_readable(&[src.path().join("a.txt")], false).unwrap();

    let (client, server, c2s, s2c) = tapped_pair();
    handshake(&client, &server, TransferConfig::default()).await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move {
            let names = client.send_files(&records, None).await.unwrap();
            client
                .send_exit(&format!("Received {}", names.join(", ")))
                .await
                .unwrap();
            names
        })
    };

    let received = server.recv_files(dest.path(), None).await.unwrap();
    let exit_msg = server.recv_exit().await.unwrap();
    let sent = sender.await.unwrap();

    assert_eq!(received, ["a.txt"]);
    assert_eq!(sent, ["a.txt"]);
    assert_eq!(exit_msg, "Received a.txt");
    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hello");

    // Frame order on each direction of the wire.
    assert_eq!(
        c2s.tags(false),
        ["ACT", "NUM", "NAME", "SIZE", "DATA", "MD5", "MD5", "EXIT"]
    );
    assert_eq!(s2c.tags(false), ["CFG", "SUCC", "SUCC", "SUCC"]);

    // The payload is plain base64; both the chunk digest and the
    // whole-file digest are hex md5("hello") under the codec's envelope.
    let wire = c2s.snapshot();
    let text = String::from_utf8_lossy(&wire);
    assert!(text.contains("#DATA:5\naGVsbG8=\n"));
    let digest_on_wire = b64(b"5d41402abc4b2a76b9719d911017c592");
    assert_eq!(text.matches(&digest_on_wire).count(), 2);
}

// =============================================================================
// Scenario: binary mode chunking at the buffer ceiling
// =============================================================================

#[tokio::test]
async fn binary_mode_chunks_at_max_buf_size() {
    const MAX_BUF: u64 = 8 * 1024 * 1024;
    const FILE_SIZE: usize = 20 * 1024 * 1024;

    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0u8..=255).cycle().take(FILE_SIZE).collect();
    fs::write(src.path().join("big.bin"), &payload).unwrap();
    let records = check_paths_readable(&[src.path().join("big.bin")], false).unwrap();

    let (client, server, c2s, s2c) = tapped_pair();
    handshake(
        &client,
        &server,
        TransferConfig {
            binary: true,
            max_buf_size: MAX_BUF,
            ..Default::default()
        },
    )
    .await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move {
            client.send_files(&records, None).await.unwrap();
            client.send_exit("Received big.bin").await.unwrap();
        })
    };

    server.recv_files(dest.path(), None).await.unwrap();
    server.recv_exit().await.unwrap();
    sender.await.unwrap();

    assert_eq!(fs::read(dest.path().join("big.bin")).unwrap(), payload);

    // Exactly three DATA frames: 8 MiB + 8 MiB + 4 MiB.
    let data_sizes: Vec<usize> = c2s
        .frames(true)
        .into_iter()
        .filter(|(tag, _)| tag == "DATA")
        .map(|(_, len)| len)
        .collect();
    assert_eq!(
        data_sizes,
        [MAX_BUF as usize, MAX_BUF as usize, FILE_SIZE - 2 * MAX_BUF as usize]
    );

    // Three per-chunk acks plus the final whole-file ack.
    let succ_count = s2c.tags(true).iter().filter(|t| *t == "SUCC").count();
    assert_eq!(succ_count, 5); // NAME ack + 3 chunk acks + final ack
}

// =============================================================================
// Scenario: user interrupt mid-transfer
// =============================================================================

#[tokio::test]
async fn interrupt_sends_one_err_and_server_exits() {
    let src = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.bin"), vec![0u8; 4096]).unwrap();
    let records = check_paths_readable(&[src.path().join("a.bin")], false).unwrap();

    let (client, server, c2s, _s2c) = tapped_pair();
    handshake(&client, &server, TransferConfig::default()).await;

    // The server acks the first chunk only, so the client is reliably
    // blocked on the second ack when the interrupt lands. On the client's
    // ERR it terminates the wire with EXIT.
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move {
            server.recv_expect(FrameTag::Num).await.unwrap();
            server.recv_expect(FrameTag::Name).await.unwrap();
            server.send_frame(FrameTag::Succ, b"a.bin").await.unwrap();
            server.recv_expect(FrameTag::Size).await.unwrap();
            server.recv_expect(FrameTag::Data).await.unwrap();
            server.recv_expect(FrameTag::Md5).await.unwrap();
            server.send_frame(FrameTag::Succ, b"ok").await.unwrap();
            server.recv_expect(FrameTag::Data).await.unwrap();
            server.recv_expect(FrameTag::Md5).await.unwrap();
            // No further ack; the next frame is the client's ERR.
            let err = server.recv_expect(FrameTag::Succ).await.unwrap_err();
            let _ = server.send_exit(&err.user_message()).await;
            err
        })
    };

    // Interrupt after the second DATA: double-cancel must still produce a
    // single ERR frame.
    let client_task = {
        let client = client.clone();
        tokio::spawn(async move {
            let err = client.send_files(&records, None).await.unwrap_err();
            client.send_error(&err).await;
            let exit = client.drain_until_exit().await;
            (err, exit)
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client.cancel();
    client.cancel();

    let (client_err, exit) = client_task.await.unwrap();
    assert!(matches!(client_err, TrzszError::Cancelled));
    assert_eq!(client_err.user_message(), "Stopped");
    assert!(exit.is_some());

    let server_err = server_task.await.unwrap();
    match server_err {
        TrzszError::Remote {
            kind,
            message,
            trace,
        } => {
            assert_eq!(kind, "Stopped");
            assert_eq!(message, "interrupted");
            assert!(!trace);
        }
        other => panic!("unexpected server error: {other}"),
    }

    let err_frames = c2s.tags(false).iter().filter(|t| *t == "ERR").count();
    assert_eq!(err_frames, 1);
}

// =============================================================================
// Scenario: receiver renames instead of overwriting
// =============================================================================

#[tokio::test]
async fn receiver_allocates_unique_name() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.txt"), b"new content").unwrap();
    fs::write(dest.path().join("a.txt"), b"old content").unwrap();
    let records = check_paths_readable(&[src.path().join("a.txt")], false).unwrap();

    let (client, server, _c2s, _s2c) = tapped_pair();
    handshake(&client, &server, TransferConfig::default()).await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move { client.send_files(&records, None).await.unwrap() })
    };
    let received = server.recv_files(dest.path(), None).await.unwrap();
    let sent = sender.await.unwrap();

    // Both sides agree on the renamed target; the original is untouched.
    assert_eq!(received, ["a.txt (1)"]);
    assert_eq!(sent, ["a.txt (1)"]);
    assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"old content");
    assert_eq!(
        fs::read(dest.path().join("a.txt (1)")).unwrap(),
        b"new content"
    );
}

// =============================================================================
// Scenario: directory transfer
// =============================================================================

#[tokio::test]
async fn directory_transfer_names_and_bodies() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let root = src.path().join("dir");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a"), b"aa").unwrap();
    fs::write(root.join("b"), b"bb").unwrap();
    fs::write(root.join("sub/c"), b"cc").unwrap();
    let records = check_paths_readable(&[root], true).unwrap();

    let (client, server, c2s, _s2c) = tapped_pair();
    handshake(
        &client,
        &server,
        TransferConfig {
            directory: true,
            ..Default::default()
        },
    )
    .await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move { client.send_files(&records, None).await.unwrap() })
    };
    let received = server.recv_files(dest.path(), None).await.unwrap();
    let sent = sender.await.unwrap();

    assert_eq!(received, ["dir"]);
    assert_eq!(sent, ["dir"]);
    assert_eq!(fs::read(dest.path().join("dir/a")).unwrap(), b"aa");
    assert_eq!(fs::read(dest.path().join("dir/b")).unwrap(), b"bb");
    assert_eq!(fs::read(dest.path().join("dir/sub/c")).unwrap(), b"cc");

    // NAME frames in walk order; only file records carry SIZE/DATA/MD5.
    let tags = c2s.tags(false);
    let names: Vec<&String> = tags.iter().filter(|t| *t == "NAME").collect();
    assert_eq!(names.len(), 5);
    let sizes = tags.iter().filter(|t| *t == "SIZE").count();
    let datas = tags.iter().filter(|t| *t == "DATA").count();
    assert_eq!(sizes, 3);
    assert_eq!(datas, 3);

    let wire = String::from_utf8_lossy(&c2s.snapshot()).into_owned();
    let positions: Vec<usize> = ["dir/", "dir/a", "dir/b", "dir/sub/", "dir/sub/c"]
        .iter()
        .map(|name| {
            wire.find(&b64(name.as_bytes()))
                .unwrap_or_else(|| panic!("{name} missing"))
        })
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted, "NAME frames out of walk order");
}

// =============================================================================
// Scenario: corrupted chunk digest
// =============================================================================

#[tokio::test]
async fn corrupted_chunk_aborts_with_fail() {
    let dest = tempfile::tempdir().unwrap();

    let (client, server, _c2s, _s2c) = tapped_pair();
    handshake(&client, &server, TransferConfig::default()).await;

    let receiver = {
        let server = server.clone();
        let dest = dest.path().to_path_buf();
        tokio::spawn(async move { server.recv_files(&dest, None).await.unwrap_err() })
    };

    // Drive the sender side by hand so chunk 2 carries a bogus digest.
    client.send_frame(FrameTag::Num, b"1").await.unwrap();
    client.send_frame(FrameTag::Name, b"a.bin").await.unwrap();
    client.recv_succ().await.unwrap();
    client.send_frame(FrameTag::Size, b"10").await.unwrap();

    let good = md5::compute(b"01234");
    client.send_frame(FrameTag::Data, b"01234").await.unwrap();
    client
        .send_frame(FrameTag::Md5, format!("{good:x}").as_bytes())
        .await
        .unwrap();
    client.recv_succ().await.unwrap();

    let bogus = md5::compute(b"not the chunk");
    client.send_frame(FrameTag::Data, b"56789").await.unwrap();
    client
        .send_frame(FrameTag::Md5, format!("{bogus:x}").as_bytes())
        .await
        .unwrap();

    // The receiver replies FAIL with the failing offset and aborts.
    let err = client.recv_succ().await.unwrap_err();
    assert!(matches!(err, TrzszError::Fail(ref msg) if msg == "md5 mismatch @5"));

    let server_err = receiver.await.unwrap();
    assert!(matches!(
        server_err,
        TrzszError::ChecksumMismatch { offset: 5 }
    ));
}

// =============================================================================
// Escaped text mode end-to-end
// =============================================================================

#[tokio::test]
async fn escaped_text_mode_round_trips_all_bytes() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    fs::write(src.path().join("all.bin"), &payload).unwrap();
    let records = check_paths_readable(&[src.path().join("all.bin")], false).unwrap();

    let (client, server, _c2s, _s2c) = tapped_pair();
    handshake(
        &client,
        &server,
        TransferConfig {
            escape_table: EscapeTable::all(),
            ..Default::default()
        },
    )
    .await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move { client.send_files(&records, None).await.unwrap() })
    };
    server.recv_files(dest.path(), None).await.unwrap();
    sender.await.unwrap();

    assert_eq!(fs::read(dest.path().join("all.bin")).unwrap(), payload);
}

// =============================================================================
// Declined transfer
// =============================================================================

#[tokio::test]
async fn declined_action_reaches_server() {
    let (client, server, _c2s, _s2c) = tapped_pair();
    client.send_action(false, false).await.unwrap();
    let action = server.recv_action().await.unwrap();
    assert!(!action.confirm);
}

// =============================================================================
// Empty file
// =============================================================================

#[tokio::test]
async fn empty_file_transfers_without_data_frames() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    fs::write(src.path().join("empty"), b"").unwrap();
    let records = check_paths_readable(&[src.path().join("empty")], false).unwrap();

    let (client, server, c2s, _s2c) = tapped_pair();
    handshake(&client, &server, TransferConfig::default()).await;

    let sender = {
        let client = client.clone();
        tokio::spawn(async move { client.send_files(&records, None).await.unwrap() })
    };
    let received = server.recv_files(dest.path(), None).await.unwrap();
    sender.await.unwrap();

    assert_eq!(received, ["empty"]);
    assert_eq!(fs::metadata(dest.path().join("empty")).unwrap().len(), 0);
    assert!(!c2s.tags(false).contains(&"DATA".to_string()));
}
