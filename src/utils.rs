//! Utility functions

use crate::error::{BuildError, BuildIoError, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Extension of the sources compiled by the underlying compiler.
pub const SOURCE_EXTENSION: &str = "scala";

/// Extension of the class files the compiler emits.
pub const CLASS_EXTENSION: &str = "class";

/// The platform's path-list separator, used to join the value side of the
/// persisted analysis records and classpath arguments.
pub const PATH_LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Canonicalize the path, platform-agnostic.
///
/// On windows this will ensure the path only consists of `/` separators.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf, BuildIoError> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path);
    #[cfg(windows)]
    let res = res.map(|p| {
        use path_slash::PathBufExt;
        PathBuf::from(p.to_slash_lossy().as_ref())
    });
    res.map_err(|err| BuildIoError::new(err, path))
}

/// Canonicalized form if the path exists on disk, the lexical absolute form
/// otherwise. Used for path identity, which must also hold for paths that
/// have not been created yet.
pub fn canonicalized(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    canonicalize(&path).unwrap_or(path)
}

/// Returns the last modification time of `path`, or `None` if the file does
/// not exist or exposes no mtime.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reads the file into a string, wrapping failures with the path.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| BuildError::io(err, path))
}

/// Writes `contents`, creating parent directories first.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    create_parent_dir_all(path)?;
    let mut file = fs::File::create(path).map_err(|err| BuildError::io(err, path))?;
    file.write_all(contents.as_bytes()).map_err(|err| BuildError::io(err, path))
}

/// Creates the parent directory of the given file.
pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            BuildError::msg(format!(
                "Failed to create artifact parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Joins path-like entries with the platform path-list separator.
pub fn join_path_list<I, S>(entries: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for entry in entries {
        if !out.is_empty() {
            out.push(PATH_LIST_SEPARATOR);
        }
        out.push_str(entry.as_ref());
    }
    out
}

/// Splits a platform path-list-separator-joined string back into entries.
/// Empty entries are dropped.
pub fn split_path_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(PATH_LIST_SEPARATOR).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_and_splits_path_lists() {
        let joined = join_path_list(["a/b", "c", "d/e/f"]);
        let entries: Vec<_> = split_path_list(&joined).collect();
        assert_eq!(entries, vec!["a/b", "c", "d/e/f"]);
        assert_eq!(split_path_list("").count(), 0);
    }

    #[test]
    fn write_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c.txt");
        write_file(&nested, "payload").unwrap();
        assert_eq!(read_to_string(&nested).unwrap(), "payload");
    }
}
