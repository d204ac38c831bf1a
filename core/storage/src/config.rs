//! Disk configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use vdisk_common::{Error, Result};

/// Top-level configuration: the default disk and every named disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Disk used by the factory's own operations.
    ///
    /// Also the driver used for disks that do not name one.
    pub default: String,
    /// Disk configurations keyed by disk name.
    #[serde(default)]
    pub disks: HashMap<String, DiskConfig>,
}

impl FilesystemConfig {
    /// Create a configuration with no disks.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            disks: HashMap::new(),
        }
    }

    /// Add a disk, replacing any previous one with the same name.
    pub fn with_disk(mut self, name: impl Into<String>, config: DiskConfig) -> Self {
        self.disks.insert(name.into(), config);
        self
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid filesystem config: {}", e)))
    }

    /// Load a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Look up a disk configuration.
    pub fn disk(&self, name: &str) -> Option<&DiskConfig> {
        self.disks.get(name)
    }
}

/// Settings for one disk.
///
/// An open set of keys; each driver reads the ones it understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskConfig(Map<String, Value>);

impl DiskConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Driver identifier, if the disk names one.
    pub fn driver(&self) -> Option<&str> {
        self.get_str("driver")
    }

    /// String value for a key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean value for a key.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Unsigned integer value for a key.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// String value that must be present and non-empty.
    pub fn require_str(&self, disk: &str, key: &str) -> Result<&str> {
        match self.get_str(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::Configuration(format!(
                "Disk '{}' requires '{}'",
                disk, key
            ))),
        }
    }

    /// Deserialize the whole disk configuration into a driver's settings type.
    pub fn parse<T: DeserializeOwned>(&self, disk: &str) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| Error::Configuration(format!("Disk '{}': {}", disk, e)))
    }

    /// Permission bits for a key.
    ///
    /// Accepts an integer (`493`) or an octal string (`"0755"`, `"755"`).
    pub fn permissions(&self, disk: &str, key: &str) -> Result<u32> {
        let invalid = || {
            Error::Configuration(format!(
                "Disk '{}' has invalid permission bits in '{}'",
                disk, key
            ))
        };

        let mode = match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(invalid)?,
            Some(Value::String(s)) => {
                let digits = s.trim_start_matches("0o");
                u32::from_str_radix(digits, 8).map_err(|_| invalid())?
            }
            _ => {
                return Err(Error::Configuration(format!(
                    "Disk '{}' requires '{}'",
                    disk, key
                )))
            }
        };

        if mode > 0o7777 {
            return Err(invalid());
        }
        Ok(mode)
    }
}
