//! Path validation and file list expansion.
//!
//! The sender expands its arguments into an ordered list of [`FileRecord`]s
//! before the transfer starts; the receiver allocates unique local names
//! when overwriting is disabled.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrzszError};

/// One source file or directory entry, in transfer order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path on the sending side.
    pub abs_path: PathBuf,
    /// Display name (basename of the source argument).
    pub name: String,
    /// Path components relative to the argument's parent; a single
    /// component outside directory mode.
    pub rel_path: Vec<String>,
    /// Size in bytes; zero for directories.
    pub size: u64,
    pub is_dir: bool,
}

impl FileRecord {
    /// The wire name: components joined by `/`, with a trailing `/`
    /// marking a directory entry.
    pub fn wire_name(&self, directory_mode: bool) -> String {
        if directory_mode {
            let mut name = self.rel_path.join("/");
            if self.is_dir {
                name.push('/');
            }
            name
        } else {
            self.name.clone()
        }
    }

    /// Whether this record names a top-level argument (its chosen local
    /// name appears in the final summary).
    pub fn is_top_level(&self) -> bool {
        self.rel_path.len() <= 1
    }
}

/// Validate that every input path is readable, expanding directories when
/// allowed.
///
/// Directories are rejected when `directory_ok` is false. In directory mode
/// each directory argument contributes itself plus a stable lexicographic
/// depth-first walk, every directory preceding its children.
pub fn check_paths_readable(paths: &[PathBuf], directory_ok: bool) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for path in paths {
        let abs = absolutize(path)?;
        let meta = std::fs::metadata(&abs)
            .map_err(|_| TrzszError::path(format!("No such file: {}", abs.display())))?;
        if meta.is_dir() {
            if !directory_ok {
                return Err(TrzszError::path(format!(
                    "Is a directory: {}",
                    abs.display()
                )));
            }
            walk_directory(&abs, &mut records)?;
        } else {
            check_readable(&abs, &meta)?;
            records.push(FileRecord {
                abs_path: abs.clone(),
                name: basename(&abs)?,
                rel_path: vec![basename(&abs)?],
                size: meta.len(),
                is_dir: false,
            });
        }
    }
    Ok(records)
}

/// Fail if two records would land at the same target name.
///
/// Run when the sender requests overwriting: a silent receiver-side rename
/// would defeat the intent.
pub fn check_duplicate_names(records: &[FileRecord]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for record in records {
        let name = record.rel_path.join("/");
        if !seen.insert(name.clone()) {
            return Err(TrzszError::path(format!("Duplicate name: {name}")));
        }
    }
    Ok(())
}

/// Validate that `dir` is a writable directory.
pub fn check_path_writable(dir: &Path) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .map_err(|_| TrzszError::path(format!("No such directory: {}", dir.display())))?;
    if !meta.is_dir() {
        return Err(TrzszError::path(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }
    if readonly(dir, &meta) {
        return Err(TrzszError::path(format!(
            "No permission to write: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Pick a name under `dir` that does not collide with an existing entry,
/// appending ` (N)` with the least N >= 1 that makes it unique.
pub fn allocate_unique_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    for n in 1u32.. {
        let candidate = format!("{name} ({n})");
        if !dir.join(&candidate).exists() {
            return candidate;
        }
    }
    unreachable!()
}

fn walk_directory(root: &Path, records: &mut Vec<FileRecord>) -> Result<()> {
    let root_name = basename(root)?;
    walk_into(root, vec![root_name], records)
}

/// Stable lexicographic depth-first walk; every directory is recorded
/// before its children and subdirectories are expanded at their sorted
/// position among siblings.
fn walk_into(path: &Path, rel: Vec<String>, records: &mut Vec<FileRecord>) -> Result<()> {
    records.push(FileRecord {
        abs_path: path.to_path_buf(),
        name: rel.last().cloned().unwrap_or_default(),
        rel_path: rel.clone(),
        size: 0,
        is_dir: true,
    });

    let mut entries: Vec<_> = std::fs::read_dir(path)
        .map_err(|_| TrzszError::path(format!("No permission to read: {}", path.display())))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let child = entry.path();
        let meta = entry.metadata()?;
        let mut child_rel = rel.clone();
        child_rel.push(
            entry
                .file_name()
                .to_str()
                .ok_or_else(|| TrzszError::path(format!("Invalid file name: {}", child.display())))?
                .to_string(),
        );
        if meta.is_dir() {
            walk_into(&child, child_rel, records)?;
        } else {
            check_readable(&child, &meta)?;
            records.push(FileRecord {
                abs_path: child,
                name: child_rel.last().cloned().unwrap_or_default(),
                rel_path: child_rel,
                size: meta.len(),
                is_dir: false,
            });
        }
    }
    Ok(())
}

fn check_readable(path: &Path, _meta: &Metadata) -> Result<()> {
    std::fs::File::open(path)
        .map(|_| ())
        .map_err(|_| TrzszError::path(format!("No permission to read: {}", path.display())))
}

fn readonly(dir: &Path, meta: &Metadata) -> bool {
    if meta.permissions().readonly() {
        return true;
    }
    // Permission bits lie under ACLs and root squashing; probing settles it.
    let probe = dir.join(".trzsz_probe");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            false
        }
        Err(_) => true,
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| TrzszError::path(format!("Invalid file name: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let err = check_paths_readable(&[missing], false).unwrap_err();
        assert!(matches!(err, TrzszError::Path { .. }));
    }

    #[test]
    fn directory_rejected_when_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_paths_readable(&[dir.path().to_path_buf()], false).unwrap_err();
        assert!(err.to_string().contains("Is a directory"));
    }

    #[test]
    fn plain_files_preserve_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let records = check_paths_readable(
            &[dir.path().join("b.txt"), dir.path().join("a.txt")],
            false,
        )
        .unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["b.txt", "a.txt"]);
        assert_eq!(records[0].size, 2);
    }

    #[test]
    fn directory_walk_order_is_depth_first_lexicographic() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("dir");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a"), b"a").unwrap();
        fs::write(root.join("b"), b"b").unwrap();
        fs::write(root.join("sub/c"), b"c").unwrap();

        let records = check_paths_readable(&[root], true).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.wire_name(true)).collect();
        assert_eq!(names, ["dir/", "dir/a", "dir/b", "dir/sub/", "dir/sub/c"]);
        let dirs: Vec<_> = records.iter().map(|r| r.is_dir).collect();
        assert_eq!(dirs, [true, false, false, true, false]);
    }

    #[test]
    fn duplicate_names_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(tmp.path().join("a.txt"), b"1").unwrap();
        fs::write(sub.join("a.txt"), b"2").unwrap();

        let records =
            check_paths_readable(&[tmp.path().join("a.txt"), sub.join("a.txt")], false).unwrap();
        assert!(check_duplicate_names(&records).is_err());

        let unique = check_paths_readable(&[tmp.path().join("a.txt")], false).unwrap();
        assert!(check_duplicate_names(&unique).is_ok());
    }

    #[test]
    fn writable_check_accepts_tempdir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(check_path_writable(tmp.path()).is_ok());
        assert!(check_path_writable(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn unique_name_appends_counter() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(allocate_unique_name(tmp.path(), "a.txt"), "a.txt");

        fs::write(tmp.path().join("a.txt"), b"x").unwrap();
        assert_eq!(allocate_unique_name(tmp.path(), "a.txt"), "a.txt (1)");

        fs::write(tmp.path().join("a.txt (1)"), b"x").unwrap();
        assert_eq!(allocate_unique_name(tmp.path(), "a.txt"), "a.txt (2)");
    }

    #[test]
    fn wire_name_marks_directories() {
        let record = FileRecord {
            abs_path: "/tmp/dir/sub".into(),
            name: "sub".into(),
            rel_path: vec!["dir".into(), "sub".into()],
            size: 0,
            is_dir: true,
        };
        assert_eq!(record.wire_name(true), "dir/sub/");
        assert!(!record.is_top_level());
    }
}
