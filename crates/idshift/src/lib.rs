//! # idshift
//!
//! UID/GID mapping for rootless containers.
//!
//! ## Features
//!
//! - **Map algebra**: parse, render, intersect and translate id map entries
//! - **Discovery**: read the kernel's `uid_map`/`gid_map` and the shadow
//!   `subuid`/`subgid` allocations
//! - **Default policy**: pick a usable allocation for unprivileged containers
//! - **Safe merge**: insert entries by splitting the ranges they overlap
//! - **Shifting**: re-own a filesystem tree, including ACLs and file
//!   capabilities, for use inside a user namespace
//!
//! ## Usage
//!
//! ```no_run
//! use idshift::idmap::{IdmapEntry, IdmapSet};
//!
//! # fn example() -> idshift_common::IdmapResult<()> {
//! let mut set = IdmapSet::new();
//! set.add_safe("b:0:100000:65536".parse::<IdmapEntry>()?)?;
//!
//! // Shift a rootfs into the namespace
//! set.shift_rootfs("/var/lib/containers/c1/rootfs".as_ref(), None)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod idmap;
pub mod shift;

pub use idmap::{IdmapEntry, IdmapSet, ShiftDirection};
pub use shift::{ShiftRecord, Shifter};
