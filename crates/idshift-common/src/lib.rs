//! # idshift-common
//!
//! Shared types for the idshift ID-mapping subsystem.
//!
//! This crate provides:
//! - The common error type and result alias
//! - Locations of the kernel and shadow ID map sources

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{IdmapError, IdmapResult};
pub use paths::HostPaths;
