//! In-memory storage backend for testing.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vdisk_common::{path, Error, Result};

use crate::filesystem::{ByteReader, FileEntry, Filesystem, Visibility};

/// In-memory file.
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: DateTime<Utc>,
    visibility: Visibility,
}

impl Entry {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            modified: Utc::now(),
            visibility: Visibility::Visible,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, Entry>,
    /// Directories created explicitly; parents of files are implicit.
    directories: BTreeSet<String>,
}

impl State {
    fn is_directory(&self, dir: &str) -> bool {
        if dir.is_empty() || self.directories.contains(dir) {
            return true;
        }
        let prefix = format!("{}/", dir);
        self.files.keys().any(|k| k.starts_with(&prefix))
            || self.directories.iter().any(|d| d.starts_with(&prefix))
    }

    /// Every directory below `dir`, explicit or implied by a file.
    fn directories_below(&self, dir: &str) -> BTreeSet<String> {
        let prefix = path::prefix(dir);
        let mut found = BTreeSet::new();

        let implied = self.files.keys().filter_map(|k| path::parent(k));
        for candidate in self.directories.iter().map(String::as_str).chain(implied) {
            let mut current = Some(candidate);
            while let Some(d) = current {
                if d.len() > prefix.len() && d.starts_with(&prefix) {
                    found.insert(d.to_string());
                }
                current = path::parent(d);
            }
        }
        found
    }
}

/// In-memory storage backend.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Debug)]
pub struct MemoryFilesystem {
    name: String,
    state: RwLock<State>,
}

impl MemoryFilesystem {
    /// Create a new empty memory backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(path: &str) -> Result<String> {
        let key = path::relative(path).trim_end_matches('/');
        if key.is_empty() {
            return Err(Error::InvalidInput("Path cannot be empty".to_string()));
        }
        Ok(key.to_string())
    }

    fn to_entry(&self, key: &str, entry: &Entry) -> FileEntry {
        FileEntry {
            name: path::file_name(key).to_string(),
            path: key.to_string(),
            size: entry.data.len() as u64,
            modified: entry.modified,
            is_directory: false,
            disk: self.name.clone(),
        }
    }

    fn list(&self, directory: &str, recursive: bool) -> Result<Vec<FileEntry>> {
        let dir = path::directory(directory);
        let prefix = path::prefix(dir);
        let state = self.state();

        if !state.is_directory(dir) {
            return Err(Error::NotFound(format!("Directory not found: {}", directory)));
        }

        Ok(state
            .files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| recursive || !k[prefix.len()..].contains('/'))
            .map(|(k, e)| self.to_entry(k, e))
            .collect())
    }

    fn list_directories(&self, directory: &str, recursive: bool) -> Result<Vec<String>> {
        let dir = path::directory(directory);
        let prefix = path::prefix(dir);
        let state = self.state();

        if !state.is_directory(dir) {
            return Err(Error::NotFound(format!("Directory not found: {}", directory)));
        }

        Ok(state
            .directories_below(dir)
            .into_iter()
            .filter(|d| recursive || !d[prefix.len()..].contains('/'))
            .collect())
    }
}

impl Filesystem for MemoryFilesystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let key = path::directory(path);
        let state = self.state();
        Ok(state.files.contains_key(key) || state.is_directory(key))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = Self::key(path)?;
        match self.state().files.get(&key) {
            Some(entry) => Ok(entry.data.clone()),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    fn read_stream(&self, path: &str) -> Result<ByteReader> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        let key = Self::key(path)?;
        let mut state = self.state_mut();

        if state.is_directory(&key) {
            return Err(Error::InvalidInput(format!("{} is a directory", path)));
        }

        state.files.insert(key, Entry::new(contents.to_vec()));
        Ok(())
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read) -> Result<()> {
        let mut data = Vec::new();
        contents.read_to_end(&mut data)?;
        self.put(path, &data)
    }

    fn get_visibility(&self, path: &str) -> Visibility {
        let key = path::directory(path);
        self.state()
            .files
            .get(key)
            .map(|e| e.visibility)
            .unwrap_or(Visibility::Invisible)
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let key = Self::key(path)?;
        match self.state_mut().files.get_mut(&key) {
            Some(entry) => {
                entry.visibility = visibility;
                Ok(())
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    fn prepend(&self, path: &str, contents: &[u8]) -> Result<()> {
        let key = Self::key(path)?;
        let mut state = self.state_mut();

        let entry = state
            .files
            .entry(key)
            .or_insert_with(|| Entry::new(Vec::new()));
        let mut data = contents.to_vec();
        data.extend_from_slice(&entry.data);
        entry.data = data;
        entry.modified = Utc::now();
        Ok(())
    }

    fn append(&self, path: &str, contents: &[u8]) -> Result<()> {
        let key = Self::key(path)?;
        let mut state = self.state_mut();

        let entry = state
            .files
            .entry(key)
            .or_insert_with(|| Entry::new(Vec::new()));
        entry.data.extend_from_slice(contents);
        entry.modified = Utc::now();
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let key = Self::key(path)?;
        match self.state_mut().files.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let from_key = Self::key(from)?;
        let to_key = Self::key(to)?;
        let mut state = self.state_mut();

        let data = state
            .files
            .get(&from_key)
            .map(|e| e.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;

        state.files.insert(to_key, Entry::new(data));
        Ok(())
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let from_key = Self::key(from)?;
        let to_key = Self::key(to)?;
        let mut state = self.state_mut();

        let mut entry = state
            .files
            .remove(&from_key)
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;

        entry.modified = Utc::now();
        state.files.insert(to_key, entry);
        Ok(())
    }

    fn size(&self, path: &str) -> Result<u64> {
        let key = Self::key(path)?;
        self.state()
            .files
            .get(&key)
            .map(|e| e.data.len() as u64)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let key = Self::key(path)?;
        self.state()
            .files
            .get(&key)
            .map(|e| e.modified)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    fn files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        self.list(directory, false)
    }

    fn all_files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        self.list(directory, true)
    }

    fn directories(&self, directory: &str) -> Result<Vec<String>> {
        self.list_directories(directory, false)
    }

    fn all_directories(&self, directory: &str) -> Result<Vec<String>> {
        self.list_directories(directory, true)
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        let key = Self::key(path)?;
        let mut state = self.state_mut();

        if state.files.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{} is a file", path)));
        }

        state.directories.insert(key);
        Ok(())
    }

    fn delete_directory(&self, directory: &str) -> Result<()> {
        let dir = Self::key(directory)?;
        let prefix = path::prefix(&dir);
        let mut state = self.state_mut();

        if !state.is_directory(&dir) {
            return Err(Error::NotFound(format!("Directory not found: {}", directory)));
        }

        state.files.retain(|k, _| !k.starts_with(&prefix));
        state
            .directories
            .retain(|d| d != &dir && !d.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_read() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/test.txt", b"Hello, World!").unwrap();

        assert_eq!(disk.read("test.txt").unwrap(), b"Hello, World!");
        assert_eq!(disk.name(), "memory");
    }

    #[test]
    fn test_exists() {
        let disk = MemoryFilesystem::new("memory");

        assert!(!disk.exists("/test.txt").unwrap());
        disk.put("/dir/test.txt", &[1, 2, 3]).unwrap();

        assert!(disk.exists("/dir/test.txt").unwrap());
        assert!(disk.exists("/dir").unwrap());
    }

    #[test]
    fn test_delete() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/test.txt", &[1, 2, 3]).unwrap();
        disk.delete("/test.txt").unwrap();

        assert!(!disk.exists("/test.txt").unwrap());
        assert!(disk.delete("/test.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_listing() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/dir/file1.txt", &[1]).unwrap();
        disk.put("/dir/file2.txt", &[2, 2]).unwrap();
        disk.put("/dir/sub/file3.txt", &[3]).unwrap();
        disk.put("/other.txt", &[4]).unwrap();
        disk.make_directory("/dir/empty").unwrap();

        let files: Vec<String> = disk.files("/dir").unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(files, vec!["dir/file1.txt", "dir/file2.txt"]);

        let all: Vec<String> = disk.all_files("/").unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(
            all,
            vec!["dir/file1.txt", "dir/file2.txt", "dir/sub/file3.txt", "other.txt"]
        );

        assert_eq!(disk.directories("/dir").unwrap(), vec!["dir/empty", "dir/sub"]);
        assert_eq!(disk.directories("").unwrap(), vec!["dir"]);
        assert_eq!(
            disk.all_directories("/").unwrap(),
            vec!["dir", "dir/empty", "dir/sub"]
        );
        assert!(disk.files("/missing").is_err());
    }

    #[test]
    fn test_move_and_copy() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/old.txt", &[1, 2, 3]).unwrap();
        disk.copy("/old.txt", "/copy.txt").unwrap();
        disk.move_file("/old.txt", "/new.txt").unwrap();

        assert!(!disk.exists("/old.txt").unwrap());
        assert_eq!(disk.read("/new.txt").unwrap(), vec![1, 2, 3]);
        assert_eq!(disk.read("/copy.txt").unwrap(), vec![1, 2, 3]);
        assert!(disk.copy("/old.txt", "/x.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_prepend_append() {
        let disk = MemoryFilesystem::new("memory");

        disk.append("/log", b"b").unwrap();
        disk.prepend("/log", b"a").unwrap();
        disk.append("/log", b"c").unwrap();

        assert_eq!(disk.get("/log").unwrap(), "abc");
        assert_eq!(disk.size("/log").unwrap(), 3);
    }

    #[test]
    fn test_delete_directory() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/tree/a.txt", &[1]).unwrap();
        disk.put("/tree/sub/b.txt", &[2]).unwrap();
        disk.put("/treehouse.txt", &[3]).unwrap();

        disk.delete_directory("/tree").unwrap();

        assert!(!disk.exists("/tree").unwrap());
        assert!(disk.exists("/treehouse.txt").unwrap());
    }

    #[test]
    fn test_visibility() {
        let disk = MemoryFilesystem::new("memory");

        disk.put("/v.txt", &[1]).unwrap();
        assert_eq!(disk.get_visibility("/v.txt"), Visibility::Visible);

        disk.set_visibility("/v.txt", Visibility::Invisible).unwrap();
        assert_eq!(disk.get_visibility("/v.txt"), Visibility::Invisible);
        assert!(disk.set_visibility("/none", Visibility::Visible).is_err());
    }
}
