//! PTY management for the wrapped command.
//!
//! Handles:
//! - Spawning the user's command under a fresh PTY
//! - Async I/O between the PTY master and the byte pumps
//! - Resize and termination
//!
//! Uses the `nix` crate for Unix PTY support and `AsyncFd` for proper async
//! I/O integration with tokio's reactor.

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execvp, fork, setsid, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use trzsz_core::error::{Result, TrzszError};

/// PTY handle for async I/O.
pub struct Pty {
    /// Master PTY file descriptor wrapped for async I/O.
    master: Arc<AsyncFd<std::fs::File>>,
    /// Child process PID.
    child_pid: Pid,
    /// Raw master fd for ioctl operations.
    master_fd: RawFd,
    /// Set once the master has been closed to signal EOF to the child.
    closed: AtomicBool,
}

impl Pty {
    /// Spawn `command args...` under a new PTY sized like the current
    /// terminal.
    pub fn spawn(command: &str, args: &[String], cols: u16, rows: u16) -> Result<Self> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pty_result = openpty(&winsize, None).map_err(|e| {
            TrzszError::Io(std::io::Error::other(format!("failed to open pty: {e}")))
        })?;

        let master_fd = pty_result.master.as_raw_fd();
        let slave_fd = pty_result.slave.as_raw_fd();

        let command_cstr = CString::new(command).map_err(|e| {
            TrzszError::Io(std::io::Error::other(format!("invalid command: {e}")))
        })?;
        let mut argv = vec![command_cstr.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(|e| {
                TrzszError::Io(std::io::Error::other(format!("invalid argument: {e}")))
            })?);
        }

        info!(command, "spawning wrapped command");

        // SAFETY: fork() in a program that may already have threads; the
        // child only calls async-signal-safe functions before execvp.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(pty_result.slave);

                let std_file = std::fs::File::from(pty_result.master);
                set_nonblocking(master_fd)?;

                let async_fd = AsyncFd::new(std_file).map_err(|e| {
                    TrzszError::Io(std::io::Error::other(format!(
                        "failed to create AsyncFd: {e}"
                    )))
                })?;

                Ok(Self {
                    master: Arc::new(async_fd),
                    child_pid: child,
                    master_fd,
                    closed: AtomicBool::new(false),
                })
            }
            Ok(ForkResult::Child) => {
                // New session with the PTY slave as controlling terminal.
                let _ = setsid();
                unsafe {
                    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);

                    libc::dup2(slave_fd, libc::STDIN_FILENO);
                    libc::dup2(slave_fd, libc::STDOUT_FILENO);
                    libc::dup2(slave_fd, libc::STDERR_FILENO);

                    if slave_fd > libc::STDERR_FILENO {
                        libc::close(slave_fd);
                    }
                    libc::close(master_fd);
                }

                let _ = execvp(&command_cstr, &argv);
                // execvp only returns on failure.
                unsafe { libc::_exit(127) }
            }
            Err(e) => Err(TrzszError::Io(std::io::Error::other(format!(
                "fork failed: {e}"
            )))),
        }
    }

    /// Write keyboard input to the child.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TrzszError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty closed",
            )));
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self
                .master
                .writable()
                .await
                .map_err(TrzszError::Io)?;

            match guard.try_io(|inner| inner.get_ref().write(remaining)) {
                Ok(Ok(n)) => {
                    remaining = &remaining[n..];
                }
                Ok(Err(e)) => return Err(TrzszError::Io(e)),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Read output from the child.
    ///
    /// Returns `None` on EOF; EIO from a closed slave side (the command
    /// exited) also reads as EOF.
    pub async fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut guard = match self.master.readable().await {
                Ok(guard) => guard,
                Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(None),
                Err(e) => return Err(TrzszError::Io(e)),
            };

            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => return Ok(Some(n)),
                Ok(Err(e)) => {
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("pty read returned EIO, command exited");
                        return Ok(None);
                    }
                    if self.closed.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    return Err(TrzszError::Io(e));
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Stop all PTY traffic and hang up the child's terminal.
    ///
    /// The master fd stays open until drop (closing it here would race the
    /// AsyncFd owner); SIGHUP carries the terminal-gone signal instead.
    pub fn close_stdin(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = kill(self.child_pid, Signal::SIGHUP);
        }
    }

    /// Resize the PTY to match the local terminal.
    pub fn resize(&self, cols: u16, rows: u16) {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        unsafe {
            libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize);
        }
        debug!(cols, rows, "pty resized");
    }

    /// Send SIGTERM to the child.
    pub fn terminate(&self) {
        let _ = kill(self.child_pid, Signal::SIGTERM);
    }

    /// Check if the child has exited; returns its exit code when done.
    pub fn try_wait(&self) -> Option<i32> {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Some(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => Some(128 + signal as i32),
            Ok(_) => None,
            Err(nix::errno::Errno::ECHILD) => Some(0),
            Err(_) => None,
        }
    }

    /// Wait for the child to exit and return its exit code.
    pub async fn wait(&self) -> i32 {
        loop {
            if let Some(code) = self.try_wait() {
                info!(code, "wrapped command exited");
                return code;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if self.try_wait().is_none() {
            self.terminate();
        }
    }
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| TrzszError::Io(std::io::Error::other(format!("fcntl failed: {e}"))))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))
        .map_err(|e| TrzszError::Io(std::io::Error::other(format!("fcntl failed: {e}"))))?;
    Ok(())
}
