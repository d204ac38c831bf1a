//! Qiniu Kodo object storage backend.
//!
//! Split in three layers:
//! - `auth`: token and URL signing
//! - `client`: the HTTP wire calls behind the [`BucketApi`] seam
//! - `provider`: the [`Filesystem`](crate::Filesystem) mapping on top

pub mod auth;
pub mod client;
pub mod provider;

#[cfg(test)]
pub(crate) mod fake;

pub use auth::Credentials;
pub use client::{BucketApi, Endpoints, QiniuClient};
pub use provider::{create_qiniu_filesystem, QiniuConfig, QiniuFilesystem};
