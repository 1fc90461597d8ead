//! The stream bridge: two byte pumps around the wrapped PTY.
//!
//! The input pump moves keyboard bytes to the child; the output pump moves
//! child output to the local terminal while scanning for the trigger
//! marker. Once a transfer session is active, the output pump redirects
//! every byte into the session's receive queue and the local terminal goes
//! dark until the session ends (the blackout invariant).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use trzsz_core::constants::{BYTE_CHANNEL_CAP, PUMP_BUF_SIZE};
use trzsz_core::progress::TransferProgress;
use trzsz_core::protocol::NewlineMode;
use trzsz_core::Transfer;

use crate::dragfile::{detect_drag_files, DragState};
use crate::pty::Pty;
use crate::transfer::handle_transfer;
use crate::trigger::{Trigger, TriggerDetector};

/// One active transfer as seen by the pumps.
pub struct ActiveSession {
    pub transfer: Arc<Transfer>,
    /// Producer side of the session's receive queue.
    feed: mpsc::Sender<Bytes>,
}

/// State shared between the pumps, the transfer task and the signal broker.
pub struct BridgeState {
    /// Fast-path flag mirroring `current`; checked before taking the lock.
    active: AtomicBool,
    /// Set by the output pump on trigger, cleared by the transfer task.
    /// The lock is only ever held to clone the Arc, never across I/O.
    current: Mutex<Option<Arc<ActiveSession>>>,
    drag: Mutex<DragState>,
    interrupting: AtomicBool,
    progress: Mutex<Option<Arc<TransferProgress>>>,
    drag_enabled: bool,
}

impl BridgeState {
    fn new(drag_enabled: bool) -> Self {
        Self {
            active: AtomicBool::new(false),
            current: Mutex::new(None),
            drag: Mutex::new(DragState::default()),
            interrupting: AtomicBool::new(false),
            progress: Mutex::new(None),
            drag_enabled,
        }
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<Arc<ActiveSession>> {
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        self.current.lock().unwrap().clone()
    }

    fn set_session(&self, session: Arc<ActiveSession>) {
        *self.current.lock().unwrap() = Some(session);
        self.active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_session(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
    }

    /// Cancel the active transfer; returns false when none is running.
    pub fn cancel_active(&self) -> bool {
        match self.session() {
            Some(session) => {
                session.transfer.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_progress(&self, progress: Arc<TransferProgress>) {
        *self.progress.lock().unwrap() = Some(progress);
    }

    pub(crate) fn take_progress(&self) -> Option<Arc<TransferProgress>> {
        self.progress.lock().unwrap().take()
    }

    /// The progress bar of the active transfer, for resize updates.
    pub fn progress(&self) -> Option<Arc<TransferProgress>> {
        self.progress.lock().unwrap().clone()
    }

    fn is_interrupting(&self) -> bool {
        self.interrupting.load(Ordering::SeqCst)
    }

    fn set_interrupting(&self, value: bool) {
        self.interrupting.store(value, Ordering::SeqCst);
    }

    fn drag_pending(&self) -> bool {
        !self.drag.lock().unwrap().is_empty()
    }

    fn drag_has_dir(&self) -> bool {
        self.drag.lock().unwrap().has_dir
    }

    /// Add a pasted batch; returns true when it started a new batch.
    fn push_drag(&self, state: DragState) -> bool {
        let mut drag = self.drag.lock().unwrap();
        let first = drag.is_empty();
        drag.merge(state);
        first
    }

    fn clear_drag(&self) {
        self.drag.lock().unwrap().take();
    }

    /// Hand the captured paths to the upload flow.
    pub(crate) fn take_drag_files(&self) -> DragState {
        self.drag.lock().unwrap().take()
    }
}

/// The bridge owns the two pumps and the child PTY handle.
pub struct Bridge {
    pty: Arc<Pty>,
    state: Arc<BridgeState>,
}

impl Bridge {
    pub fn new(pty: Pty, drag_enabled: bool) -> Self {
        Self {
            pty: Arc::new(pty),
            state: Arc::new(BridgeState::new(drag_enabled)),
        }
    }

    pub fn pty(&self) -> Arc<Pty> {
        self.pty.clone()
    }

    pub fn state(&self) -> Arc<BridgeState> {
        self.state.clone()
    }

    /// Run both pumps until the child exits; returns its exit code.
    pub async fn run(&self) -> i32 {
        let pty = self.pty.clone();
        let state = self.state.clone();
        tokio::spawn(async move { input_pump(pty, state).await });

        let pty = self.pty.clone();
        let state = self.state.clone();
        tokio::spawn(async move { output_pump(pty, state).await });

        crate::signal::spawn_signal_handlers(self.pty.clone(), self.state.clone());

        self.pty.wait().await
    }
}

/// Local keyboard -> child PTY.
async fn input_pump(pty: Arc<Pty>, state: Arc<BridgeState>) {
    let mut stdin = StdinReader::new();
    loop {
        let Some(buf) = stdin.read().await else {
            // EOF on the local terminal: close the child's stdin.
            debug!("stdin EOF, closing pty");
            pty.close_stdin();
            break;
        };

        if let Some(session) = state.session() {
            // The interrupt key stops the transfer; everything else is
            // swallowed while a session is active.
            if buf.first() == Some(&0x03) {
                session.transfer.cancel();
            }
            continue;
        }

        if state.drag_enabled {
            if let Some(drag) = detect_drag_files(&buf) {
                if state.push_drag(drag) {
                    let pty = pty.clone();
                    let state = state.clone();
                    tokio::spawn(async move { upload_drag_files(pty, state).await });
                }
                continue;
            }
            if state.drag_pending() {
                state.clear_drag();
            }
        }

        if pty.write(&buf).await.is_err() {
            break;
        }
    }
}

/// Child PTY -> local terminal, with trigger detection and blackout.
async fn output_pump(pty: Arc<Pty>, state: Arc<BridgeState>) {
    let mut detector = TriggerDetector::new();
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; PUMP_BUF_SIZE];

    loop {
        match pty.read(&mut buf).await {
            Ok(Some(n)) => {
                if let Some(session) = state.session() {
                    // Blackout: every byte goes to the session queue.
                    let _ = session.feed.send(Bytes::copy_from_slice(&buf[..n])).await;
                    continue;
                }

                let (forward, trigger) = detector.feed(&buf[..n]);
                if let Some(trigger) = trigger {
                    // The echo must reach the terminal before queueing
                    // starts, so the user sees the acknowledged marker.
                    let _ = stdout.write_all(&forward).await;
                    let _ = stdout.flush().await;
                    start_transfer(&pty, &state, trigger);
                    continue;
                }

                if state.is_interrupting() {
                    continue;
                }
                if state.drag_enabled && state.drag_pending() && swallow_drag_echo(&forward, &mut stdout).await {
                    continue;
                }

                if !forward.is_empty() {
                    let _ = stdout.write_all(&forward).await;
                    let _ = stdout.flush().await;
                }
            }
            Ok(None) | Err(_) => {
                let _ = stdout.flush().await;
                break;
            }
        }
    }
}

/// Hide the auto-typed `trz` command from the terminal.
async fn swallow_drag_echo(forward: &[u8], stdout: &mut tokio::io::Stdout) -> bool {
    let stripped = strip_vt100(forward);
    let trimmed: &[u8] = {
        let mut s = stripped.as_slice();
        while let [rest @ .., b'\r' | b'\n'] = s {
            s = rest;
        }
        s
    };
    if trimmed == b"trz" {
        let _ = stdout.write_all(b"\r\n").await;
        let _ = stdout.flush().await;
        return true;
    }
    trimmed.is_empty() || trimmed == b"\""
}

/// Remove ANSI escape sequences from an echoed line.
fn strip_vt100(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == 0x1b {
            i += 1;
            if data.get(i) == Some(&b'[') {
                i += 1;
                while i < data.len() && !data[i].is_ascii_alphabetic() {
                    i += 1;
                }
                i += 1;
            } else {
                i += 1;
            }
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Set up a transfer session and hand it to the engine task.
///
/// The session is registered before this returns, so the very next output
/// pump iteration already queues into it.
fn start_transfer(pty: &Arc<Pty>, state: &Arc<BridgeState>, trigger: Trigger) {
    info!(mode = ?trigger.mode, version = %trigger.version, "transfer triggered");

    let (feed_tx, feed_rx) = mpsc::channel(BYTE_CHANNEL_CAP);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(BYTE_CHANNEL_CAP);

    let newline = if trigger.remote_is_windows {
        NewlineMode::Crlf
    } else {
        NewlineMode::Lf
    };
    let transfer = Arc::new(Transfer::with_remote_newline(feed_rx, out_tx, newline));

    state.set_session(Arc::new(ActiveSession {
        transfer: transfer.clone(),
        feed: feed_tx,
    }));

    // Writer: engine frames -> child PTY.
    let pty_writer = pty.clone();
    tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if pty_writer.write(&bytes).await.is_err() {
                break;
            }
        }
    });

    let state = state.clone();
    tokio::spawn(async move { handle_transfer(state, trigger, transfer).await });
}

/// Interrupt the remote prompt and type `trz` for the dragged paths.
async fn upload_drag_files(pty: Arc<Pty>, state: Arc<BridgeState>) {
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    if !state.drag_pending() {
        return;
    }
    state.set_interrupting(true);
    let _ = pty.write(&[0x03]).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    state.set_interrupting(false);

    if state.drag_has_dir() {
        let _ = pty
            .write(b"echo 'upload directory is not supported yet'\n")
            .await;
        state.clear_drag();
        return;
    }
    let _ = pty.write(b"trz\n").await;

    // If no trigger consumed the paths, forget them.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    if state.drag_pending() && state.session().is_none() {
        state.clear_drag();
    }
}

/// Async stdin reader using AsyncFd for true async I/O.
struct StdinReader {
    async_fd: AsyncFd<RawFd>,
    fd: RawFd,
}

impl StdinReader {
    fn new() -> Self {
        let fd = io::stdin().as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        let async_fd = AsyncFd::new(fd).expect("failed to create AsyncFd for stdin");
        Self { async_fd, fd }
    }

    /// Read a chunk from stdin; `None` on EOF or unrecoverable error.
    async fn read(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; PUMP_BUF_SIZE];
        loop {
            let mut guard = match self.async_fd.readable().await {
                Ok(guard) => guard,
                Err(_) => return None,
            };
            match guard.try_io(|inner| {
                let n = unsafe {
                    libc::read(
                        *inner.get_ref(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => return Some(buf[..n].to_vec()),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(_)) => return None,
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for StdinReader {
    fn drop(&mut self) {
        // Restore blocking mode for whoever inherits the terminal.
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(self.fd, libc::F_SETFL, flags & !libc::O_NONBLOCK);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_vt100_removes_csi_sequences() {
        assert_eq!(strip_vt100(b"\x1b[32mtrz\x1b[0m"), b"trz");
        assert_eq!(strip_vt100(b"plain"), b"plain");
    }

    #[test]
    fn state_session_lifecycle() {
        let state = BridgeState::new(false);
        assert!(state.session().is_none());
        assert!(!state.cancel_active());

        let (feed, _rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (_tx2, rx2) = mpsc::channel(4);
        let transfer = Arc::new(Transfer::new(rx2, out_tx));
        state.set_session(Arc::new(ActiveSession {
            transfer: transfer.clone(),
            feed,
        }));
        assert!(state.session().is_some());

        assert!(state.cancel_active());
        assert!(transfer.is_cancelled());

        state.clear_session();
        assert!(state.session().is_none());
    }

    #[test]
    fn drag_batches_accumulate_until_taken() {
        let state = BridgeState::new(true);
        assert!(state.push_drag(DragState {
            files: vec!["/a".into()],
            has_dir: false,
        }));
        assert!(!state.push_drag(DragState {
            files: vec!["/b".into()],
            has_dir: true,
        }));
        assert!(state.drag_pending());
        assert!(state.drag_has_dir());

        let taken = state.take_drag_files();
        assert_eq!(taken.files.len(), 2);
        assert!(!state.drag_pending());
    }
}
