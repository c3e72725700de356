//! Reading kernel and administrator id allocations.
//!
//! Two sources are understood:
//! - `/proc/self/{uid,gid}_map`: `nsStart hostStart size`, whitespace separated
//! - `/etc/sub{u,g}id`: `user:start:size`
//!
//! Both allow `#` comments.

use std::fs;
use std::io;
use std::path::Path;

use idshift_common::{HostPaths, IdmapError, IdmapResult};

use super::entry::IdmapEntry;
use super::set::IdmapSet;

/// One line of a kernel `uid_map`/`gid_map` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRange {
    /// First id inside the namespace.
    pub ns_id: i64,
    /// First id in the parent namespace.
    pub host_id: i64,
    /// Number of ids.
    pub size: i64,
}

/// One matching line of a subuid/subgid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubordinateRange {
    /// First subordinate id.
    pub start: i64,
    /// Number of ids.
    pub size: i64,
}

fn read_source(path: &Path) -> IdmapResult<String> {
    fs::read_to_string(path).map_err(|e| IdmapError::unreadable(path, e))
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

fn unexpected(path: &Path, line: &str) -> IdmapError {
    IdmapError::unreadable(
        path,
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected values {line:?}"),
        ),
    )
}

fn parse_id(field: &str) -> Option<i64> {
    field.trim().parse::<u32>().ok().map(i64::from)
}

/// Read a kernel id map file into ordered ranges.
///
/// Lines whose numbers do not parse are skipped.
///
/// # Errors
///
/// Returns [`IdmapError::UnreadableSource`] if the file cannot be read or a
/// line has fewer than three fields, and [`IdmapError::EmptyKernelMap`] if no
/// line yields a range.
pub fn read_kernel_map(path: &Path) -> IdmapResult<Vec<KernelRange>> {
    let content = read_source(path)?;

    let mut ranges = Vec::new();
    for line in content.lines() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(unexpected(path, line));
        }

        let (Some(ns_id), Some(host_id), Some(size)) =
            (parse_id(fields[0]), parse_id(fields[1]), parse_id(fields[2]))
        else {
            continue;
        };

        ranges.push(KernelRange {
            ns_id,
            host_id,
            size,
        });
    }

    if ranges.is_empty() {
        return Err(IdmapError::EmptyKernelMap {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(path = %path.display(), count = ranges.len(), "Read kernel id map");
    Ok(ranges)
}

/// Read the subordinate ranges granted to `username`, in file order.
///
/// User names match case-insensitively.
///
/// # Errors
///
/// Returns [`IdmapError::NoUserMap`] if the user has no entry and
/// [`IdmapError::UnreadableSource`] on I/O failure or a malformed line.
pub fn read_shadow_map(path: &Path, username: &str) -> IdmapResult<Vec<SubordinateRange>> {
    let content = read_source(path)?;

    let mut ranges = Vec::new();
    for line in content.lines() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            return Err(unexpected(path, line));
        }

        if !fields[0].eq_ignore_ascii_case(username) {
            continue;
        }

        if let (Some(start), Some(size)) = (parse_id(fields[1]), parse_id(fields[2])) {
            ranges.push(SubordinateRange { start, size });
        }
    }

    if ranges.is_empty() {
        return Err(IdmapError::NoUserMap {
            user: username.to_string(),
            path: path.to_path_buf(),
        });
    }

    Ok(ranges)
}

/// The id map of the calling process, read from the default locations.
///
/// # Errors
///
/// See [`current_idmap_set_with`].
pub fn current_idmap_set() -> IdmapResult<IdmapSet> {
    current_idmap_set_with(&HostPaths::default())
}

/// The id map of the calling process.
///
/// A missing map file means the process is not namespaced; that class gets a
/// zero-length placeholder entry instead.
///
/// # Errors
///
/// Fails if a map file exists but cannot be read or holds no range.
pub fn current_idmap_set_with(paths: &HostPaths) -> IdmapResult<IdmapSet> {
    let mut set = IdmapSet::new();

    for (is_uid, path) in [(true, &paths.uid_map), (false, &paths.gid_map)] {
        if !path.exists() {
            set.push(IdmapEntry {
                is_uid,
                is_gid: !is_uid,
                ns_id: 0,
                host_id: 0,
                map_range: 0,
            });
            continue;
        }

        for range in read_kernel_map(path)? {
            set.push(IdmapEntry {
                is_uid,
                is_gid: !is_uid,
                ns_id: range.ns_id,
                host_id: range.host_id,
                map_range: range.size,
            });
        }
    }

    Ok(set)
}
