//! Disk factory: resolves disk names to cached backends.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, error};

use vdisk_common::{Error, Result};

use crate::config::{DiskConfig, FilesystemConfig};
use crate::filesystem::{ByteReader, FileEntry, Filesystem, Visibility};
use crate::registry::{DriverConstructor, DriverRegistry};

/// Entry point resolving disk names to backends.
///
/// Backends are built on first use and cached for the lifetime of the
/// factory; each disk name is constructed at most once. The factory is
/// itself a [`Filesystem`] that forwards every call to the default disk.
pub struct DiskFactory {
    config: FilesystemConfig,
    registry: RwLock<DriverRegistry>,
    disks: RwLock<HashMap<String, Arc<dyn Filesystem>>>,
    default: OnceLock<Arc<dyn Filesystem>>,
}

impl DiskFactory {
    /// Create a factory with the built-in drivers.
    pub fn new(config: FilesystemConfig) -> Self {
        Self::with_registry(config, DriverRegistry::with_builtin_drivers())
    }

    /// Create a factory with an explicit driver registry.
    pub fn with_registry(config: FilesystemConfig, registry: DriverRegistry) -> Self {
        Self {
            config,
            registry: RwLock::new(registry),
            disks: RwLock::new(HashMap::new()),
            default: OnceLock::new(),
        }
    }

    /// The configuration this factory was built with.
    pub fn config(&self) -> &FilesystemConfig {
        &self.config
    }

    /// Name of the disk behind the factory's own operations.
    pub fn default_disk_name(&self) -> &str {
        &self.config.default
    }

    /// Register or replace a driver.
    ///
    /// Disks already constructed keep their backend; only later
    /// resolutions see the new constructor.
    pub fn extend<F>(&self, driver: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &DiskConfig) -> Result<Arc<dyn Filesystem>> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(driver, constructor);
    }

    /// Names of the registered drivers.
    pub fn drivers(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .drivers()
    }

    /// Names of the disks constructed so far, sorted.
    pub fn resolved_disks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .disks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolve a disk by name.
    ///
    /// # Panics
    /// - The disk is not configured
    /// - Its driver is not registered
    /// - The driver refuses the configuration
    ///
    /// A misconfigured disk never yields a backend, so writes cannot land
    /// on an unintended medium.
    pub fn disk(&self, name: &str) -> Arc<dyn Filesystem> {
        match self.try_disk(name) {
            Ok(disk) => disk,
            Err(e) => {
                error!("Cannot resolve disk '{}': {}", name, e);
                panic!("filesystem: cannot resolve disk '{}': {}", name, e);
            }
        }
    }

    /// Resolve a disk by name, reporting configuration errors as `Err`.
    ///
    /// Nothing is cached when construction fails.
    pub fn try_disk(&self, name: &str) -> Result<Arc<dyn Filesystem>> {
        {
            let disks = self.disks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(disk) = disks.get(name) {
                return Ok(disk.clone());
            }
        }

        let mut disks = self.disks.write().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have won the race while we waited for the lock.
        if let Some(disk) = disks.get(name) {
            return Ok(disk.clone());
        }

        let disk = self.construct(name)?;
        disks.insert(name.to_string(), disk.clone());
        Ok(disk)
    }

    fn construct(&self, name: &str) -> Result<Arc<dyn Filesystem>> {
        let config = self.config.disk(name).ok_or_else(|| {
            Error::Configuration(format!("Disk '{}' is not configured", name))
        })?;
        let driver = config.driver().unwrap_or(self.config.default.as_str());

        let constructor: DriverConstructor = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(driver)
            .ok_or_else(|| Error::UnsupportedDriver {
                disk: name.to_string(),
                driver: driver.to_string(),
            })?;

        debug!("Constructing disk '{}' with driver '{}'", name, driver);
        constructor(name, config)
    }

    fn default_disk(&self) -> &Arc<dyn Filesystem> {
        self.default.get_or_init(|| self.disk(&self.config.default))
    }
}

impl std::fmt::Debug for DiskFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFactory")
            .field("default", &self.config.default)
            .field("drivers", &self.drivers())
            .field("resolved", &self.resolved_disks())
            .finish()
    }
}

impl Filesystem for DiskFactory {
    fn name(&self) -> &str {
        self.default_disk().name()
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.default_disk().exists(path)
    }

    fn get(&self, path: &str) -> Result<String> {
        self.default_disk().get(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.default_disk().read(path)
    }

    fn read_stream(&self, path: &str) -> Result<ByteReader> {
        self.default_disk().read_stream(path)
    }

    fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.default_disk().put(path, contents)
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read) -> Result<()> {
        self.default_disk().write_stream(path, contents)
    }

    fn get_visibility(&self, path: &str) -> Visibility {
        self.default_disk().get_visibility(path)
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        self.default_disk().set_visibility(path, visibility)
    }

    fn prepend(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.default_disk().prepend(path, contents)
    }

    fn append(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.default_disk().append(path, contents)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.default_disk().delete(path)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.default_disk().copy(from, to)
    }

    fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.default_disk().move_file(from, to)
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.default_disk().size(path)
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.default_disk().last_modified(path)
    }

    fn files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        self.default_disk().files(directory)
    }

    fn all_files(&self, directory: &str) -> Result<Vec<FileEntry>> {
        self.default_disk().all_files(directory)
    }

    fn directories(&self, directory: &str) -> Result<Vec<String>> {
        self.default_disk().directories(directory)
    }

    fn all_directories(&self, directory: &str) -> Result<Vec<String>> {
        self.default_disk().all_directories(directory)
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        self.default_disk().make_directory(path)
    }

    fn delete_directory(&self, directory: &str) -> Result<()> {
        self.default_disk().delete_directory(directory)
    }

    /// Shut down every constructed backend.
    ///
    /// All backends are attempted; the first error is returned. The cache is
    /// left intact.
    fn shutdown(&self) -> Result<()> {
        let disks: Vec<(String, Arc<dyn Filesystem>)> = self
            .disks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, disk)| (name.clone(), disk.clone()))
            .collect();

        let mut first_error = None;
        for (name, disk) in disks {
            if let Err(e) = disk.shutdown() {
                error!("Shutdown of disk '{}' failed: {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
