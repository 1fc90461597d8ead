//! Progress reporting for file transfers.
//!
//! The engine reports through [`ProgressListener`]; the terminal rendering
//! lives in [`TransferProgress`], which is absent entirely when the session
//! is quiet.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Events emitted by the transfer engine.
///
/// The default implementations ignore everything, so listeners override
/// only what they render.
pub trait ProgressListener: Send + Sync {
    /// Total number of records in this transfer.
    fn on_num(&self, _num: u64) {}
    /// A new file is starting.
    fn on_name(&self, _name: &str) {}
    /// Size of the current file.
    fn on_size(&self, _size: u64) {}
    /// Cumulative bytes moved for the current file.
    fn on_step(&self, _step: u64) {}
    /// The current file finished under the given local name.
    fn on_done(&self, _name: &str) {}
}

/// Terminal progress bar honoring the terminal width and, under a
/// multiplexer, the pane width.
pub struct TransferProgress {
    bar: ProgressBar,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    columns: u16,
    pane_width: i32,
    file_num: u64,
    file_idx: u64,
    file_name: String,
}

impl TransferProgress {
    /// Create a bar sized for `(terminal_columns, pane_width)`.
    ///
    /// A `pane_width <= 0` means no pane constraint.
    pub fn new(columns: u16, pane_width: i32) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout());
        let progress = Self {
            bar,
            state: Mutex::new(ProgressState {
                columns,
                pane_width,
                file_num: 0,
                file_idx: 0,
                file_name: String::new(),
            }),
        };
        progress.apply_style();
        progress
    }

    /// Update the rendered position; `total` fixes the denominator.
    pub fn update(&self, current: u64, total: u64) {
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(current);
    }

    /// React to a terminal resize.
    pub fn set_columns(&self, columns: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.columns = columns;
        }
        self.apply_style();
    }

    /// Clear the bar from the screen.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn effective_width(&self) -> u16 {
        let state = self.state.lock().unwrap();
        if state.pane_width > 0 {
            state.columns.min(state.pane_width as u16)
        } else {
            state.columns
        }
    }

    fn apply_style(&self) {
        // Leave room for name, counters, rate and percentage around the bar.
        let width = self.effective_width();
        let bar_width = width.saturating_sub(50).clamp(10, 60);
        let template =
            format!("{{msg}} [{{bar:{bar_width}}}] {{bytes}}/{{total_bytes}} {{bytes_per_sec}}");
        if let Ok(style) = ProgressStyle::with_template(&template) {
            self.bar.set_style(style.progress_chars("=>-"));
        }
    }
}

impl ProgressListener for TransferProgress {
    fn on_num(&self, num: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.file_num = num;
            state.file_idx = 0;
        }
    }

    fn on_name(&self, name: &str) {
        let message = {
            let mut state = self.state.lock().unwrap();
            state.file_idx += 1;
            state.file_name = name.to_string();
            if state.file_num > 1 {
                format!("({}/{}) {}", state.file_idx, state.file_num, name)
            } else {
                name.to_string()
            }
        };
        self.bar.set_position(0);
        self.bar.set_message(message);
    }

    fn on_size(&self, size: u64) {
        self.bar.set_length(size);
    }

    fn on_step(&self, step: u64) {
        self.bar.set_position(step);
    }

    fn on_done(&self, _name: &str) {
        let total = self.bar.length().unwrap_or(0);
        self.bar.set_position(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_width_caps_columns() {
        let progress = TransferProgress::new(200, 80);
        assert_eq!(progress.effective_width(), 80);

        let progress = TransferProgress::new(120, -1);
        assert_eq!(progress.effective_width(), 120);
    }

    #[test]
    fn resize_updates_width() {
        let progress = TransferProgress::new(80, -1);
        progress.set_columns(132);
        assert_eq!(progress.effective_width(), 132);
    }

    #[test]
    fn listener_tracks_file_counters() {
        let progress = TransferProgress::new(80, -1);
        progress.on_num(3);
        progress.on_name("a.txt");
        progress.on_size(100);
        progress.on_step(50);
        progress.on_done("a.txt");
        let state = progress.state.lock().unwrap();
        assert_eq!(state.file_idx, 1);
        assert_eq!(state.file_name, "a.txt");
    }
}
