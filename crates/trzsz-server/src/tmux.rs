//! Multiplexer detection.
//!
//! Binary framing cannot survive tmux control mode, so the sender needs to
//! know what it is running under before fixing the config. Pane width
//! constrains the client's progress bar.

use std::process::Command;

use trzsz_core::error::{Result, TrzszError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmuxMode {
    /// Not running under tmux.
    None,
    /// Regular attached tmux client.
    Normal,
    /// Control mode (e.g. iTerm2 integration); frames are rewritten.
    Control,
}

#[derive(Debug, Clone, Copy)]
pub struct TmuxContext {
    pub mode: TmuxMode,
    /// Pane width, or <= 0 when unconstrained.
    pub pane_width: i32,
}

impl TmuxContext {
    fn none() -> Self {
        Self {
            mode: TmuxMode::None,
            pane_width: -1,
        }
    }
}

/// Detect the surrounding multiplexer.
pub fn check_tmux() -> Result<TmuxContext> {
    if std::env::var("TMUX").unwrap_or_default().is_empty() {
        return Ok(TmuxContext::none());
    }

    let output = Command::new("tmux")
        .args(["display-message", "-p", "#{client_control_mode}:#{pane_width}"])
        .output()
        .map_err(|e| TrzszError::Io(std::io::Error::other(format!("tmux detection failed: {e}"))))?;
    if !output.status.success() {
        return Err(TrzszError::protocol(format!(
            "tmux display-message failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_display_message(text.trim()).ok_or_else(|| {
        TrzszError::protocol(format!("unexpected tmux display-message output: {text:?}"))
    })
}

fn parse_display_message(text: &str) -> Option<TmuxContext> {
    let (control, width) = text.split_once(':')?;
    let mode = if control == "1" {
        TmuxMode::Control
    } else {
        TmuxMode::Normal
    };
    let pane_width = width.parse().unwrap_or(-1);
    Some(TmuxContext { mode, pane_width })
}
