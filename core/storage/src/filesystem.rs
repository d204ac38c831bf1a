//! Filesystem trait definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

use vdisk_common::{Error, Result};

/// Coarse access classification of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable and writable by this process, or publicly served.
    Visible,
    /// Not writable by this process, or served only through signed URLs.
    Invisible,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => write!(f, "visible"),
            Visibility::Invisible => write!(f, "invisible"),
        }
    }
}

/// Metadata for one entry returned by a listing.
///
/// Produced fresh on every listing call and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Final path component, or the object key for flat stores.
    pub name: String,
    /// Disk-relative path, usable with the same disk.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Name of the disk this entry was listed from.
    pub disk: String,
}

/// Blocking byte reader returned by [`Filesystem::read_stream`].
pub type ByteReader = Box<dyn Read + Send>;

/// Uniform file storage interface implemented by every backend.
///
/// All calls block the calling thread for the duration of the underlying
/// I/O. Paths are disk-relative; a leading `/` is ignored.
pub trait Filesystem: Send + Sync {
    /// Name of the disk this backend serves.
    fn name(&self) -> &str;

    /// Check if a path exists.
    ///
    /// A missing path is `Ok(false)`; any other failure is an error.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Read a file as UTF-8 text.
    ///
    /// # Errors
    /// - File not found
    /// - Contents are not valid UTF-8
    fn get(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| Error::Encoding(format!("{}: {}", path, e)))
    }

    /// Read the complete contents of a file.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    fn read_stream(&self, path: &str) -> Result<ByteReader>;

    /// Write a file, replacing any previous contents.
    ///
    /// # Postconditions
    /// - Missing parent directories are created where the medium has them
    fn put(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Write a file from a reader, replacing any previous contents.
    fn write_stream(&self, path: &str, contents: &mut dyn Read) -> Result<()>;

    /// Get the visibility of a path.
    fn get_visibility(&self, path: &str) -> Visibility;

    /// Change the visibility of a path.
    ///
    /// Backends that cannot change per-object visibility accept the call
    /// and leave the object unchanged.
    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()>;

    /// Insert `contents` before the existing data.
    ///
    /// A missing file is created with just `contents`.
    fn prepend(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Add `contents` after the existing data.
    ///
    /// A missing file is created with just `contents`.
    fn append(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Delete a file.
    fn delete(&self, path: &str) -> Result<()>;

    /// Copy a file.
    fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Move/rename a file.
    fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// Size of a file in bytes.
    fn size(&self, path: &str) -> Result<u64>;

    /// Last modification time of a file.
    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>>;

    /// Files directly inside `directory`.
    fn files(&self, directory: &str) -> Result<Vec<FileEntry>>;

    /// Files anywhere below `directory`.
    fn all_files(&self, directory: &str) -> Result<Vec<FileEntry>>;

    /// Disk-relative paths of the directories directly inside `directory`.
    fn directories(&self, directory: &str) -> Result<Vec<String>>;

    /// Disk-relative paths of all directories below `directory`.
    fn all_directories(&self, directory: &str) -> Result<Vec<String>>;

    /// Create a directory, including parents.
    fn make_directory(&self, path: &str) -> Result<()>;

    /// Delete a directory and everything below it.
    fn delete_directory(&self, directory: &str) -> Result<()>;

    /// Release resources held by the backend.
    ///
    /// Optional to invoke; backends live for the lifetime of their factory.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
