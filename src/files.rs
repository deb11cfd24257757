//! Filesystem gateway used by the file and directory endpoints.
//!
//! All functions are blocking; handlers call them through
//! `tokio::task::spawn_blocking`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

use crate::protocol::{DirectoryEntry, FileMode};

/// Errors from filesystem operations
#[derive(Debug, Error)]
pub enum FileError {
    #[error("file exists: {0}")]
    FileExists(PathBuf),

    #[error("directory exists: {0}")]
    DirectoryExists(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// A regular file read from disk
#[derive(Debug, Clone)]
pub struct FileContents {
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub mode: FileMode,
}

/// Outcome of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    NotPresent,
}

pub fn is_file(path: &Path) -> bool {
    path.is_file()
}

pub fn is_dir(path: &Path) -> bool {
    path.is_dir()
}

/// Wire mode for a metadata snapshot.
#[cfg(unix)]
pub fn file_mode(meta: &Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    let ft = meta.file_type();
    FileMode::from_unix(meta.permissions().mode(), ft.is_dir(), ft.is_symlink())
}

/// Wire mode for a metadata snapshot.
#[cfg(not(unix))]
pub fn file_mode(meta: &Metadata) -> FileMode {
    let ft = meta.file_type();
    let perm = if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    };
    FileMode::from_unix(perm, ft.is_dir(), ft.is_symlink())
}

fn modified(meta: &Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

/// Read a file's content, modification time and mode.
pub fn read_file(path: &Path) -> FileResult<FileContents> {
    let meta = fs::metadata(path).map_err(FileError::io("stat", path))?;
    let content = fs::read(path).map_err(FileError::io("read", path))?;
    Ok(FileContents {
        content,
        timestamp: modified(&meta),
        mode: file_mode(&meta),
    })
}

/// Write `content` to `path`, then apply `timestamp` and `mode`.
///
/// An existing file is only replaced when `force` is set. A zero permission
/// word leaves the default permissions in place.
pub fn write_file(
    path: &Path,
    content: &[u8],
    mode: FileMode,
    timestamp: Option<DateTime<Utc>>,
    force: bool,
) -> FileResult<()> {
    if is_file(path) && !force {
        return Err(FileError::FileExists(path.to_path_buf()));
    }

    fs::write(path, content).map_err(FileError::io("write", path))?;

    // mtime first: a read-only mode would stop us reopening the file for it
    if let Some(ts) = timestamp {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(FileError::io("open", path))?;
        file.set_modified(SystemTime::from(ts))
            .map_err(FileError::io("set modification time", path))?;
    }

    if mode.unix_permissions() != 0 {
        set_permissions(path, mode).map_err(FileError::io("chmod", path))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: FileMode) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.unix_permissions()))
}

#[cfg(not(unix))]
fn set_permissions(path: &Path, mode: FileMode) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode.perm() & 0o200 == 0);
    fs::set_permissions(path, perms)
}

/// Remove a regular file; a missing file is not an error.
pub fn delete_file(path: &Path) -> FileResult<Removal> {
    if !is_file(path) {
        return Ok(Removal::NotPresent);
    }
    fs::remove_file(path).map_err(FileError::io("delete", path))?;
    Ok(Removal::Deleted)
}

/// Create `path` and any missing parents. Fails if `path` is already a directory.
pub fn create_dir_all(path: &Path, mode: FileMode) -> FileResult<()> {
    if is_dir(path) {
        return Err(FileError::DirectoryExists(path.to_path_buf()));
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        let perm = mode.unix_permissions();
        builder.mode(if perm == 0 { 0o777 } else { perm });
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(path)
        .map_err(FileError::io("create directory", path))
}

/// Remove a directory tree. Fails if `path` is not a directory.
pub fn remove_dir_all(path: &Path) -> FileResult<()> {
    if !is_dir(path) {
        return Err(FileError::NotADirectory(path.to_path_buf()));
    }
    fs::remove_dir_all(path).map_err(FileError::io("remove directory", path))
}

/// Snapshot the entries of a directory, keyed by name.
///
/// Entries are described by their own metadata, so a symlink is reported as
/// a symlink rather than as its target.
pub fn list_dir(path: &Path) -> FileResult<BTreeMap<String, DirectoryEntry>> {
    if !is_dir(path) {
        return Err(FileError::NotADirectory(path.to_path_buf()));
    }
    let mut entries = BTreeMap::new();
    for entry in fs::read_dir(path).map_err(FileError::io("read directory", path))? {
        let entry = entry.map_err(FileError::io("read directory", path))?;
        let entry_path = entry.path();
        let meta = fs::symlink_metadata(&entry_path).map_err(FileError::io("stat", &entry_path))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.insert(
            name.clone(),
            DirectoryEntry {
                name,
                size: meta.len(),
                mod_time: modified(&meta),
                mode: file_mode(&meta),
            },
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let ts = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap();

        write_file(&path, b"\x00\x01payload", FileMode(0o640), Some(ts), false).unwrap();
        let read = read_file(&path).unwrap();

        assert_eq!(read.content, b"\x00\x01payload");
        assert_eq!(read.timestamp, ts);
        assert!(read.mode.is_regular());
        #[cfg(unix)]
        assert_eq!(read.mode.perm(), 0o640);
    }

    #[test]
    fn test_write_refuses_existing_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keep.txt");
        fs::write(&path, "original").unwrap();

        let result = write_file(&path, b"new", FileMode(0o644), None, false);
        assert!(matches!(result, Err(FileError::FileExists(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");

        write_file(&path, b"new", FileMode(0o644), None, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_read_only_mode_still_sets_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ro.txt");
        let ts = Utc.with_ymd_and_hms(2019, 2, 3, 4, 5, 6).unwrap();

        write_file(&path, b"x", FileMode(0o444), Some(ts), false).unwrap();
        let read = read_file(&path).unwrap();
        assert_eq!(read.mode.perm(), 0o444);
        assert_eq!(read.timestamp, ts);
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = read_file(&temp_dir.path().join("missing"));
        assert!(matches!(result, Err(FileError::Io { op: "stat", .. })));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.txt");
        fs::write(&path, "x").unwrap();

        assert_eq!(delete_file(&path).unwrap(), Removal::Deleted);
        assert!(!path.exists());
        assert_eq!(delete_file(&path).unwrap(), Removal::NotPresent);
    }

    #[test]
    fn test_delete_ignores_directories() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(delete_file(temp_dir.path()).unwrap(), Removal::NotPresent);
        assert!(temp_dir.path().exists());
    }

    #[test]
    fn test_mkdir_list_rmdir() {
        let temp_dir = TempDir::new().unwrap();
        let foo = temp_dir.path().join("foo");

        create_dir_all(&foo.join("moo"), FileMode(0o700)).unwrap();

        let top = list_dir(temp_dir.path()).unwrap();
        let entry = top.get("foo").expect("foo listed");
        assert_eq!(entry.name, "foo");
        assert!(entry.mode.is_dir());

        let inner = list_dir(&foo).unwrap();
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["moo"]);

        remove_dir_all(&foo).unwrap();
        assert!(!list_dir(temp_dir.path()).unwrap().contains_key("foo"));
    }

    #[test]
    fn test_mkdir_existing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = create_dir_all(temp_dir.path(), FileMode(0o755));
        assert!(matches!(result, Err(FileError::DirectoryExists(_))));
    }

    #[test]
    fn test_rmdir_and_list_require_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        assert!(matches!(
            remove_dir_all(&file),
            Err(FileError::NotADirectory(_))
        ));
        assert!(matches!(list_dir(&file), Err(FileError::NotADirectory(_))));
        assert!(file.exists());
    }

    #[test]
    fn test_list_dir_reports_size() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("five.txt"), "12345").unwrap();

        let entries = list_dir(temp_dir.path()).unwrap();
        let entry = &entries["five.txt"];
        assert_eq!(entry.size, 5);
        assert!(entry.mode.is_regular());
    }
}
