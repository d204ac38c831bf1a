//! Local filesystem storage backend.

use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use vdisk_common::{path, Error, Result};

use crate::config::DiskConfig;
use crate::filesystem::{ByteReader, FileEntry, Filesystem, Visibility};

/// Local filesystem storage backend.
///
/// Every path is resolved below a configured root directory. Files are
/// created with the disk's permission bits.
pub struct LocalFilesystem {
    name: String,
    root: PathBuf,
    perm: u32,
}

impl LocalFilesystem {
    /// Create a new local backend with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created (with parents) if it doesn't exist
    ///
    /// # Errors
    /// - Root exists but is not a directory
    /// - Root cannot be created
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, perm: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::Configuration(format!(
                    "Local root {} is not a directory",
                    root.display()
                )));
            }
            Err(_) => {
                create_dirs(&root, perm).map_err(|e| {
                    Error::Configuration(format!(
                        "Cannot create local root {}: {}",
                        root.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self {
            name: name.into(),
            root,
            perm,
        })
    }

    /// Build from a disk configuration (`root`, `perm`).
    pub fn from_config(name: &str, config: &DiskConfig) -> Result<Self> {
        let root = config.require_str(name, "root")?;
        let perm = config.permissions(name, "perm")?;
        Self::new(name, root, perm)
    }

    /// Root directory of this disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a disk path to a filesystem path.
    fn to_fs_path(&self, disk_path: &str) -> PathBuf {
        let relative = path::relative(disk_path).trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Disk-relative, `/`-separated form of a path below the root.
    fn to_disk_path(&self, fs_path: &Path) -> String {
        let relative = fs_path.strip_prefix(&self.root).unwrap_or(fs_path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn entry(&self, fs_path: &Path, meta: &fs::Metadata) -> FileEntry {
        let modified: DateTime<Utc> = meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());
        let disk_path = self.to_disk_path(fs_path);

        FileEntry {
            name: path::file_name(&disk_path).to_string(),
            path: disk_path,
            size: meta.len(),
            modified,
            is_directory: meta.is_dir(),
            disk: self.name.clone(),
        }
    }

    fn write_options(&self, append: bool) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.perm);
        }
        options
    }

    /// Open a file for writing, creating the parent directory on failure.
    ///
    /// The original open error is returned if the parent cannot be created.
    fn open_for_write(&self, disk_path: &str, append: bool) -> Result<File> {
        let fs_path = self.to_fs_path(disk_path);

        match self.write_options(append).open(&fs_path) {
            Ok(file) => Ok(file),
            Err(open_err) => {
                let parent = match fs_path.parent() {
                    Some(parent) => parent,
                    None => return Err(io_error(disk_path, open_err)),
                };
                if create_dirs(parent, self.perm).is_err() {
                    return Err(io_error(disk_path, open_err));
                }
                self.write_options(append)
                    .open(&fs_path)
                    .map_err(|e| io_error(disk_path, e))
            }
        }
    }

    fn ensure_parent(&self, disk_path: &str) -> Result<()> {
        if let Some(parent) = self.to_fs_path(disk_path).parent() {
            if !parent.exists() {
                create_dirs(parent, self.perm).map_err(|e| io_error(disk_path, e))?;
            }
        }
        Ok(())
    }

    fn metadata(&self, disk_path: &str) -> Result<fs::Metadata> {
        fs::metadata(self.to_fs_path(disk_path)).map_err(|e| io_error(disk_path, e))
    }

    fn read_dir(&self, directory: &str, want_dirs: bool) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let fs_dir = self.to_fs_path(directory);
        let mut results = Vec::new();

        for entry in fs::read_dir(&fs_dir).map_err(|e| io_error(directory, e))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() == want_dirs {
                results.push((entry.path(), meta));
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn walk(&self, directory: &str, want_dirs: bool) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let fs_dir = self.to_fs_path(directory);
        if !fs_dir.is_dir() {
            return Err(Error::NotFound(format!("Directory not found: {}", directory)));
        }

        let mut results = Vec::new();
        for entry in WalkDir::new(&fs_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() == want_dirs {
                let meta = entry.metadata().map_err(io::Error::from)?;
                results.push((entry.into_path(), meta));
            }
        }
        Ok(results)
    }
}

impl Filesystem for LocalFilesystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.to_fs_path(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.to_fs_path(path)).map_err(|e| io_error(path, e))
    }

    fn read_stream(&self, path: &str) -> Result<ByteReader> {
        let file = File::open(self.to_fs_path(path)).map_err(|e| io_error(path, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut file = self.open_for_write(path, false)?;
        file.write_all(contents)?;
        Ok(())
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read) -> Result<()> {
        let file = self.open_for_write(path, false)?;
        let mut writer = BufWriter::new(file);
        io::copy(contents, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn get_visibility(&self, path: &str) -> Visibility {
        let fs_path = self.to_fs_path(path);

        // Directories cannot be opened for writing; use their write bits.
        let readable_and_writable = match fs::metadata(&fs_path) {
            Ok(meta) if meta.is_dir() => !meta.permissions().readonly(),
            _ => OpenOptions::new()
                .read(true)
                .write(true)
                .open(&fs_path)
                .is_ok(),
        };

        if readable_and_writable {
            Visibility::Visible
        } else {
            Visibility::Invisible
        }
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            let mode = match visibility {
                Visibility::Visible => self.perm,
                Visibility::Invisible => self.perm & !0o222,
            };
            fs::Permissions::from_mode(mode)
        };

        #[cfg(not(unix))]
        let permissions = {
            let mut permissions = self.metadata(path)?.permissions();
            permissions.set_readonly(visibility == Visibility::Invisible);
            permissions
        };

        fs::set_permissions(&fs_path, permissions).map_err(|e| io_error(path, e))
    }

    fn prepend(&self, path: &str, contents: &[u8]) -> Result<()> {
        match self.read(path) {
            Ok(original) => {
                let mut data = Vec::with_capacity(contents.len() + original.len());
                data.extend_from_slice(contents);
                data.extend_from_slice(&original);
                self.put(path, &data)
            }
            Err(e) if e.is_not_found() => self.put(path, contents),
            Err(e) => Err(e),
        }
    }

    fn append(&self, path: &str, contents: &[u8]) -> Result<()> {
        let mut file = self.open_for_write(path, true)?;
        file.write_all(contents)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.to_fs_path(path)).map_err(|e| io_error(path, e))
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_parent(to)?;
        fs::copy(self.to_fs_path(from), self.to_fs_path(to)).map_err(|e| io_error(from, e))?;
        Ok(())
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_parent(to)?;
        fs::rename(self.to_fs_path(from), self.to_fs_path(to)).map_err(|e| io_error(from, e))
    }

    fn size(&self, path: &str) -> Result<u64> {
        Ok(self.metadata(path)?.len())
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let modified = self.metadata(path)?.modified()?;
        Ok(modified.into())
    }

    fn files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        Ok(self
            .read_dir(directory, false)?
            .iter()
            .map(|(fs_path, meta)| self.entry(fs_path, meta))
            .collect())
    }

    fn all_files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        Ok(self
            .walk(directory, false)?
            .iter()
            .map(|(fs_path, meta)| self.entry(fs_path, meta))
            .collect())
    }

    fn directories(&self, directory: &str) -> Result<Vec<String>> {
        Ok(self
            .read_dir(directory, true)?
            .iter()
            .map(|(fs_path, _)| self.to_disk_path(fs_path))
            .collect())
    }

    fn all_directories(&self, directory: &str) -> Result<Vec<String>> {
        Ok(self
            .walk(directory, true)?
            .iter()
            .map(|(fs_path, _)| self.to_disk_path(fs_path))
            .collect())
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        create_dirs(&self.to_fs_path(path), self.perm).map_err(|e| io_error(path, e))
    }

    fn delete_directory(&self, directory: &str) -> Result<()> {
        let fs_dir = self.to_fs_path(directory);
        if fs_dir == self.root {
            return Err(Error::InvalidInput(
                "Refusing to delete the disk root".to_string(),
            ));
        }
        fs::remove_dir_all(fs_dir).map_err(|e| io_error(directory, e))
    }
}

/// Create a directory and its parents.
///
/// Directories get search permission wherever `perm` grants read.
fn create_dirs(dir: &Path, perm: u32) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(perm | ((perm & 0o444) >> 2));
    }
    #[cfg(not(unix))]
    let _ = perm;
    builder.create(dir)
}

fn io_error(path: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(format!("File not found: {}", path)),
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn local(temp: &TempDir) -> LocalFilesystem {
        LocalFilesystem::new("local", temp.path(), 0o755).unwrap()
    }

    #[test]
    fn test_local_put_read() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/test.txt", b"Hello, Local!").unwrap();

        assert_eq!(disk.read("/test.txt").unwrap(), b"Hello, Local!");
        assert_eq!(disk.get("test.txt").unwrap(), "Hello, Local!");
    }

    #[test]
    fn test_put_creates_missing_parent() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/a/b/c/deep.txt", b"deep").unwrap();

        assert!(temp.path().join("a/b/c").is_dir());
        assert_eq!(disk.get("/a/b/c/deep.txt").unwrap(), "deep");
    }

    #[test]
    fn test_put_truncates() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("f.txt", b"a much longer text").unwrap();
        disk.put("f.txt", b"short").unwrap();

        assert_eq!(disk.get("f.txt").unwrap(), "short");
    }

    #[test]
    fn test_root_that_is_a_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = LocalFilesystem::new("local", &file, 0o755).err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_missing_root_is_created() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested/root");

        let disk = LocalFilesystem::new("local", &root, 0o755).unwrap();

        assert!(root.is_dir());
        assert_eq!(disk.root(), root.as_path());
    }

    #[test]
    fn test_from_config_requires_root_and_perm() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_string_lossy().to_string();

        let missing_perm = DiskConfig::new().with("root", root.clone());
        assert!(LocalFilesystem::from_config("local", &missing_perm).is_err());

        let missing_root = DiskConfig::new().with("perm", "0755");
        assert!(LocalFilesystem::from_config("local", &missing_root).is_err());

        let complete = DiskConfig::new().with("root", root).with("perm", "0755");
        let disk = LocalFilesystem::from_config("uploads", &complete).unwrap();
        assert_eq!(disk.name(), "uploads");
    }

    #[test]
    fn test_exists_and_delete() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        assert!(!disk.exists("/gone.txt").unwrap());
        disk.put("/gone.txt", b"x").unwrap();
        assert!(disk.exists("/gone.txt").unwrap());

        disk.delete("/gone.txt").unwrap();
        assert!(!disk.exists("/gone.txt").unwrap());
        assert!(disk.delete("/gone.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_prepend_and_append() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.append("/log.txt", b"middle").unwrap();
        disk.prepend("/log.txt", b"start-").unwrap();
        disk.append("/log.txt", b"-end").unwrap();

        assert_eq!(disk.get("/log.txt").unwrap(), "start-middle-end");

        disk.prepend("/fresh/new.txt", b"only").unwrap();
        assert_eq!(disk.get("/fresh/new.txt").unwrap(), "only");
    }

    #[test]
    fn test_streams() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        let mut source: &[u8] = b"streamed contents";
        disk.write_stream("/streams/s.txt", &mut source).unwrap();

        let mut reader = disk.read_stream("/streams/s.txt").unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "streamed contents");

        assert!(disk.read_stream("/streams/missing").is_err());
    }

    #[test]
    fn test_copy_and_move() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/src.txt", b"payload").unwrap();
        disk.copy("/src.txt", "/copies/dst.txt").unwrap();
        assert_eq!(disk.get("/src.txt").unwrap(), "payload");
        assert_eq!(disk.get("/copies/dst.txt").unwrap(), "payload");

        disk.move_file("/src.txt", "/moved/src.txt").unwrap();
        assert!(!disk.exists("/src.txt").unwrap());
        assert_eq!(disk.get("/moved/src.txt").unwrap(), "payload");
    }

    #[test]
    fn test_size_and_last_modified() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);
        let before = Utc::now() - chrono::Duration::seconds(5);

        disk.put("/sized.bin", &[0u8; 42]).unwrap();

        assert_eq!(disk.size("/sized.bin").unwrap(), 42);
        assert!(disk.last_modified("/sized.bin").unwrap() >= before);
        assert!(disk.size("/missing.bin").unwrap_err().is_not_found());
    }

    #[test]
    fn test_listing() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/dir/file1.txt", b"1").unwrap();
        disk.put("/dir/file2.txt", b"22").unwrap();
        disk.put("/dir/sub/file3.txt", b"333").unwrap();
        disk.make_directory("/dir/sub/empty").unwrap();

        let files = disk.files("/dir").unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["dir/file1.txt", "dir/file2.txt"]);
        assert_eq!(files[1].name, "file2.txt");
        assert_eq!(files[1].size, 2);
        assert_eq!(files[1].disk, "local");
        assert!(!files[1].is_directory);

        let all = disk.all_files("/dir").unwrap();
        let paths: Vec<&str> = all.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["dir/file1.txt", "dir/file2.txt", "dir/sub/file3.txt"]
        );

        assert_eq!(disk.directories("/dir").unwrap(), vec!["dir/sub"]);
        assert_eq!(
            disk.all_directories("/dir").unwrap(),
            vec!["dir/sub", "dir/sub/empty"]
        );
    }

    #[test]
    fn test_listing_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        assert!(disk.files("/nope").unwrap_err().is_not_found());
        assert!(disk.all_files("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_directory_is_recursive() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/tree/a/b.txt", b"b").unwrap();
        disk.put("/tree/c.txt", b"c").unwrap();

        disk.delete_directory("/tree").unwrap();

        assert!(!disk.exists("/tree").unwrap());
        assert!(disk.delete_directory("/").is_err());
        assert!(temp.path().is_dir());
    }

    #[test]
    fn test_visibility() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.put("/visible.txt", b"x").unwrap();
        assert_eq!(disk.get_visibility("/visible.txt"), Visibility::Visible);
        assert_eq!(disk.get_visibility("/missing.txt"), Visibility::Invisible);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = |disk: &LocalFilesystem| {
                disk.metadata("/visible.txt").unwrap().permissions().mode() & 0o777
            };

            disk.set_visibility("/visible.txt", Visibility::Invisible).unwrap();
            assert_eq!(mode(&disk) & 0o222, 0);

            disk.set_visibility("/visible.txt", Visibility::Visible).unwrap();
            assert_eq!(mode(&disk), 0o755);
        }
    }

    #[test]
    fn test_directory_visibility_follows_write_bits() {
        let temp = TempDir::new().unwrap();
        let disk = local(&temp);

        disk.make_directory("/docs").unwrap();
        assert_eq!(disk.get_visibility("/docs"), Visibility::Visible);
        assert_eq!(disk.get_visibility("/"), Visibility::Visible);

        disk.set_visibility("/docs", Visibility::Invisible).unwrap();
        assert_eq!(disk.get_visibility("/docs"), Visibility::Invisible);

        disk.set_visibility("/docs", Visibility::Visible).unwrap();
        assert_eq!(disk.get_visibility("/docs"), Visibility::Visible);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn put_then_read_round_trips(
            path in "/?[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.bin",
            contents in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let temp = TempDir::new().unwrap();
            let disk = local(&temp);

            disk.put(&path, &contents).unwrap();
            prop_assert_eq!(disk.read(&path).unwrap(), contents);
        }
    }
}
