//! Driver registry for dynamic backend construction.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use vdisk_common::Result;

use crate::config::DiskConfig;
use crate::filesystem::Filesystem;

/// Constructor function type: builds a backend for `(disk name, config)`.
pub type DriverConstructor =
    Arc<dyn Fn(&str, &DiskConfig) -> Result<Arc<dyn Filesystem>> + Send + Sync>;

/// Registry mapping driver identifiers to backend constructors.
///
/// Each factory owns its own registry, so independent factories never
/// see each other's drivers.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with the built-in drivers: `local`, `memory`, `qiniu`.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();

        registry.register("local", |name, config| {
            let disk: Arc<dyn Filesystem> =
                Arc::new(crate::local::LocalFilesystem::from_config(name, config)?);
            Ok(disk)
        });

        registry.register("memory", |name, _config| {
            let disk: Arc<dyn Filesystem> = Arc::new(crate::memory::MemoryFilesystem::new(name));
            Ok(disk)
        });

        registry.register("qiniu", |name, config| {
            crate::qiniu::create_qiniu_filesystem(name, config)
        });

        registry
    }

    /// Register a driver constructor.
    ///
    /// # Postconditions
    /// - `name` resolves to `constructor`
    /// - A previous constructor under the same name is replaced
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &DiskConfig) -> Result<Arc<dyn Filesystem>> + Send + Sync + 'static,
    {
        self.register_constructor(name, Arc::new(constructor));
    }

    /// Register an already shared constructor.
    pub fn register_constructor(&mut self, name: impl Into<String>, constructor: DriverConstructor) {
        let name = name.into();
        if self.drivers.insert(name.clone(), constructor).is_some() {
            debug!("Driver '{}' re-registered, previous constructor replaced", name);
        } else {
            debug!("Driver '{}' registered", name);
        }
    }

    /// Look up the constructor for a driver.
    ///
    /// Returns `None` for unknown drivers; the caller decides how to fail.
    pub fn resolve(&self, name: &str) -> Option<DriverConstructor> {
        self.drivers.get(name).cloned()
    }

    /// Get list of registered driver names, sorted.
    pub fn drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a driver is registered.
    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFilesystem;

    fn memory(name: &str) -> Result<Arc<dyn Filesystem>> {
        Ok(Arc::new(MemoryFilesystem::new(name)))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = DriverRegistry::new();

        registry.register("test", |name, _| memory(name));

        let constructor = registry.resolve("test").unwrap();
        let disk = constructor("scratch", &DiskConfig::new()).unwrap();
        assert_eq!(disk.name(), "scratch");
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = DriverRegistry::new();

        registry.register("test", |_, _| memory("first"));
        registry.register("test", |_, _| memory("second"));

        let constructor = registry.resolve("test").unwrap();
        let disk = constructor("ignored", &DiskConfig::new()).unwrap();
        assert_eq!(disk.name(), "second");
        assert_eq!(registry.drivers(), vec!["test".to_string()]);
    }

    #[test]
    fn test_resolve_unknown_is_none() {
        let registry = DriverRegistry::new();
        assert!(registry.resolve("unknown").is_none());
        assert!(!registry.has_driver("unknown"));
    }

    #[test]
    fn test_builtin_drivers() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert_eq!(
            registry.drivers(),
            vec!["local".to_string(), "memory".to_string(), "qiniu".to_string()]
        );
    }
}
