//! File IO under the storage root.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::StorageError;

/// Joins a stored file name onto the root, refusing anything that could
/// leave it. A relative root is refused too.
pub fn resolve(root: &Path, name: &str) -> Result<PathBuf, StorageError> {
    if !root.is_absolute() {
        return Err(StorageError::RelativeRoot(root.to_path_buf()));
    }
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.')
        || name.contains("..")
    {
        return Err(StorageError::OutsideRoot(name.to_string()));
    }
    Ok(root.join(name))
}

/// Writes `bytes` to `path` only if nothing exists there yet. Missing
/// parent directories are created. A partially written file is removed.
pub fn create_if_absent(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| StorageError::io("create directory", dir, e))?;
    }
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StorageError::io("create", path, e))?;
    let written = f.write_all(bytes).and_then(|_| f.sync_all());
    drop(f);
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(StorageError::io("write", path, e));
    }
    debug!(path = %path.display(), bytes = bytes.len(), "file written");
    Ok(())
}

pub fn exists(root: &Path, name: &str) -> Result<bool, StorageError> {
    let path = resolve(root, name)?;
    match fs::metadata(&path) {
        Ok(m) => Ok(m.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io("stat", path, e)),
    }
}

pub fn read(root: &Path, name: &str) -> Result<Vec<u8>, StorageError> {
    let path = resolve(root, name)?;
    fs::read(&path).map_err(|e| StorageError::io("read", path, e))
}

/// Removes files written during a failed submission. Returns a description
/// of every file that could not be removed. Already-missing files count as
/// removed.
pub fn remove_written(paths: &[String]) -> Result<(), Vec<String>> {
    let mut remaining = Vec::new();
    for p in paths {
        match fs::remove_file(p) {
            Ok(()) => debug!(path = %p, "removed new file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => remaining.push(format!("{p}: {e}")),
        }
    }
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(remaining)
    }
}

/// Deletes files made obsolete by a committed update. Failures are logged,
/// not returned: the database no longer references these files.
pub fn remove_obsolete(root: &Path, names: &[String]) -> usize {
    let mut removed = 0;
    for name in names {
        let path = match resolve(root, name) {
            Ok(p) => p,
            Err(e) => {
                error!(file = %name, error = %e, "refusing to remove obsolete file");
                continue;
            }
        };
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(file = %name, error = %e, "unable to remove obsolete file"),
        }
    }
    removed
}
