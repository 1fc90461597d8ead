//! Drag-and-drop upload detection.
//!
//! Terminals paste a dragged file as its quoted or escaped absolute path.
//! When the heuristic matches, the bridge swallows the pasted characters,
//! interrupts the remote prompt and types `trz` to start an upload with the
//! captured paths.

use std::path::{Path, PathBuf};

/// Paths captured from one paste, plus whether any of them is a directory.
#[derive(Debug, Clone, Default)]
pub struct DragState {
    pub files: Vec<PathBuf>,
    pub has_dir: bool,
}

impl DragState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn take(&mut self) -> DragState {
        std::mem::take(self)
    }

    pub fn merge(&mut self, other: DragState) {
        self.files.extend(other.files);
        self.has_dir |= other.has_dir;
    }
}

/// Decide whether a stdin chunk is a pasted list of local paths.
///
/// Every whitespace-separated token must name an existing absolute path
/// (quoting and backslash-escaped spaces are honored); anything else means
/// the user is typing and the bytes pass through untouched.
pub fn detect_drag_files(buf: &[u8]) -> Option<DragState> {
    if buf.len() < 3 || buf[0] == 0x1b {
        return None;
    }
    let text = std::str::from_utf8(buf).ok()?;
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() || text.chars().any(|c| c.is_control()) {
        return None;
    }

    let mut state = DragState::default();
    for token in split_paths(text)? {
        let path = expand_home(&token)?;
        if !path.is_absolute() {
            return None;
        }
        let meta = std::fs::metadata(&path).ok()?;
        state.has_dir |= meta.is_dir();
        state.files.push(path);
    }
    if state.is_empty() {
        return None;
    }
    Some(state)
}

/// Split pasted text into path tokens, honoring single quotes, double
/// quotes and backslash-escaped spaces.
fn split_paths(text: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => current.push(chars.next()?),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return None;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

fn expand_home(token: &str) -> Option<PathBuf> {
    if let Some(rest) = token.strip_prefix("~/") {
        return Some(dirs_home()?.join(rest));
    }
    Some(PathBuf::from(token))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).filter(|p| Path::new(p).is_dir())
}
