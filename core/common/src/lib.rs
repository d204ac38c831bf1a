//! Common utilities and types shared across the vdisk crates.
//!
//! This module provides the error taxonomy every backend reports through,
//! and the small set of path helpers that give all backends the same view
//! of a disk-relative path.

pub mod error;
pub mod path;

pub use error::{BatchFailure, Error, Result};
