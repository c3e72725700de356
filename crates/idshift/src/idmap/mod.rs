//! UID/GID map data model and algorithms.
//!
//! This module provides:
//! - [`IdmapEntry`]: one namespace-to-host mapping segment and its algebra
//! - [`IdmapSet`]: ordered entries with first-match translation, strict
//!   append and splitting safe merge
//! - Discovery of kernel (`/proc/self/*id_map`) and shadow (`/etc/sub*id`) maps
//! - Normalization into contiguous [`IdRange`]s
//! - The default map selection policy for unprivileged containers

pub mod discovery;
mod entry;
mod merge;
pub mod policy;
mod range;
mod set;

pub use discovery::{current_idmap_set, current_idmap_set_with, read_kernel_map, read_shadow_map};
pub use entry::{ID_DOMAIN, IdmapEntry, cmp_by_class_then_nsid};
pub use policy::{default_idmap_set, default_idmap_set_with, get_idmap_set, select_idmap_set};
pub use range::{IdRange, valid_ranges};
pub use set::{IdMapping, IdmapSet, ShiftDirection};
