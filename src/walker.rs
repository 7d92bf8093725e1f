// Directory walker: enumerates the regular files of a project tree.
//
// Directories whose base name is in the ignore set are pruned whole.
// Symlinks are never followed, and never emitted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::WalkError;

/// Dependency cache directory that never ships with a package.
pub const DEPENDENCY_CACHE_DIR: &str = "node_modules";

/// Ignore set used by `deploy`. Exact base-name matches only.
pub const DEFAULT_IGNORE: &[&str] = &[DEPENDENCY_CACHE_DIR];

/// Mode recorded for files on platforms without POSIX permissions.
pub const FALLBACK_FILE_MODE: u32 = 0o644;

/// One regular file found under the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the root, `/`-separated on every platform.
    pub relative_name: String,
    pub absolute_path: PathBuf,
    /// POSIX permission bits.
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub root_path: PathBuf,
    pub ignore_names: BTreeSet<String>,
}

impl WalkOptions {
    /// Options for `root` with the default ignore set.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ignore_names: DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_ignore<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Walks `options.root_path` depth-first in lexicographic order.
///
/// Any unreadable directory aborts the whole walk; a partial file list is
/// never returned.
pub fn walk(options: &WalkOptions) -> Result<Vec<FileEntry>, WalkError> {
    let root = options.root_path.as_path();
    let meta = std::fs::metadata(root).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            WalkError::Missing(root.to_path_buf())
        } else {
            WalkError::Unreadable {
                path: root.to_path_buf(),
                source,
            }
        }
    })?;
    if !meta.is_dir() {
        return Err(WalkError::NotADirectory(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, &options.ignore_names));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| walk_failure(root, err))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = path.strip_prefix(root).map_err(|_| WalkError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other("path escaped walk root"),
        })?;
        let metadata = entry.metadata().map_err(|err| walk_failure(root, err))?;

        let relative_name = forward_slashed(rel).ok_or_else(|| WalkError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
        })?;
        files.push(FileEntry {
            relative_name,
            absolute_path: path.to_path_buf(),
            mode: file_mode(&metadata),
        });
    }

    tracing::debug!(root = %root.display(), files = files.len(), "walked source tree");
    Ok(files)
}

fn is_ignored_dir(entry: &walkdir::DirEntry, ignore: &BTreeSet<String>) -> bool {
    // The root itself is never pruned, whatever it is called.
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| ignore.contains(name))
}

fn walk_failure(root: &Path, err: walkdir::Error) -> WalkError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    WalkError::Unreadable { path, source }
}

// `None` for names that are not valid UTF-8; lossy conversion could map two
// distinct files onto one member name.
fn forward_slashed(rel: &Path) -> Option<String> {
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    FALLBACK_FILE_MODE
}
