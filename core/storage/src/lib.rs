//! Pluggable file storage for vdisk.
//!
//! Every backend implements the [`Filesystem`] trait. A [`DiskFactory`]
//! resolves named disks from configuration through a [`DriverRegistry`],
//! constructing each backend once and caching it.
//!
//! # Built-in drivers
//! - `local`: a directory on the local filesystem
//! - `memory`: process-local storage, mostly for tests
//! - `qiniu`: a Qiniu Kodo bucket

pub mod config;
pub mod factory;
pub mod filesystem;
pub mod local;
pub mod memory;
pub mod qiniu;
pub mod registry;

pub use config::{DiskConfig, FilesystemConfig};
pub use factory::DiskFactory;
pub use filesystem::{ByteReader, FileEntry, Filesystem, Visibility};
pub use local::LocalFilesystem;
pub use memory::MemoryFilesystem;
pub use qiniu::{QiniuConfig, QiniuFilesystem};
pub use registry::{DriverConstructor, DriverRegistry};
