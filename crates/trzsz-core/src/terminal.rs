//! Terminal raw-mode handling.
//!
//! Raw mode is acquired once around an entire session and restored
//! unconditionally on every exit path via a guard.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Result, TrzszError};

/// Original terminal settings to restore on exit.
static ORIGINAL_TERMIOS: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Flag indicating if we're in raw mode.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guard that restores terminal settings on drop.
pub struct RawModeGuard {
    fd: RawFd,
}

impl RawModeGuard {
    /// Enter raw terminal mode on stdin.
    ///
    /// Returns a guard that restores normal mode on drop.
    pub fn enter() -> Result<Self> {
        let fd = io::stdin().as_raw_fd();

        let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
        let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
        if result != 0 {
            return Err(TrzszError::Io(io::Error::last_os_error()));
        }
        let original = unsafe { termios.assume_init() };

        if let Ok(mut guard) = ORIGINAL_TERMIOS.lock() {
            *guard = Some(original);
        }

        let mut raw = original;
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
        raw.c_oflag &= !libc::OPOST;
        raw.c_cflag |= libc::CS8;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        let result = unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw) };
        if result != 0 {
            return Err(TrzszError::Io(io::Error::last_os_error()));
        }

        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        debug!("Entered raw terminal mode");

        Ok(Self { fd })
    }

    /// Check if raw mode is currently active.
    pub fn is_active() -> bool {
        RAW_MODE_ACTIVE.load(Ordering::SeqCst)
    }

    fn restore(&self) {
        let original = match ORIGINAL_TERMIOS.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(original) = original {
            let result = unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &original) };
            if result != 0 {
                warn!("Failed to restore terminal settings");
            } else {
                debug!("Restored terminal settings");
            }
        }
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Restore terminal settings (for signal handlers).
pub fn restore_terminal() {
    let fd = io::stdin().as_raw_fd();
    if let Ok(guard) = ORIGINAL_TERMIOS.lock() {
        if let Some(ref original) = *guard {
            unsafe {
                libc::tcsetattr(fd, libc::TCSAFLUSH, original);
            }
        }
    }
    RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
}

/// Current terminal size as `(cols, rows)`; 80x24 when stdout is not a
/// terminal.
pub fn terminal_size() -> (u16, u16) {
    let fd = io::stdout().as_raw_fd();

    let mut winsize = std::mem::MaybeUninit::<libc::winsize>::uninit();
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, winsize.as_mut_ptr()) };
    if result != 0 {
        return (80, 24);
    }
    let winsize = unsafe { winsize.assume_init() };
    if winsize.ws_col == 0 || winsize.ws_row == 0 {
        (80, 24)
    } else {
        (winsize.ws_col, winsize.ws_row)
    }
}

/// Current terminal width in columns.
pub fn terminal_columns() -> u16 {
    terminal_size().0
}
