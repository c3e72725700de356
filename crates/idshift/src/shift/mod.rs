//! Recursive ownership shifting of filesystem trees.
//!
//! Walks a tree in lexical order and, for every path, translates the owner,
//! POSIX ACLs and file capabilities through an [`IdmapSet`]. The walk is a
//! single sequential pass; the first failure aborts it and paths already
//! shifted stay shifted.

mod acl;
mod backend;
mod fscaps;
mod probe;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use idshift_common::{IdmapError, IdmapResult};

use crate::idmap::{IdmapSet, ShiftDirection};

pub use acl::{XATTR_ACL_ACCESS, XATTR_ACL_DEFAULT, shift_acl_xattr};
pub use backend::{AclShift, FileStat, FsBackend, HostFs};
pub use fscaps::{FileCaps, XATTR_CAPS};
pub use probe::{VFS3_FSCAPS, VfsCapsProbe};

/// Decides whether to prune a path: called with the walk root, the path and
/// its metadata. Returning `true` skips the path and, for a directory,
/// everything below it.
pub type SkipFn<'a> = &'a dyn Fn(&Path, &Path, &fs::Metadata) -> bool;

/// Ownership change made (or, in dry-run mode, planned) for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftRecord {
    /// The shifted path.
    pub path: PathBuf,
    /// Previous owner uid.
    pub uid: i64,
    /// Previous owner gid.
    pub gid: i64,
    /// New owner uid, `-1` if unmapped.
    pub new_uid: i64,
    /// New owner gid, `-1` if unmapped.
    pub new_gid: i64,
}

/// State threaded through one walk.
#[derive(Debug)]
struct ShiftContext {
    direction: ShiftDirection,
    dry_run: bool,
    fscaps_supported: bool,
    hard_links: HashSet<(u64, u64)>,
}

/// Applies an [`IdmapSet`] to filesystem trees.
pub struct Shifter<'a, B: FsBackend> {
    set: &'a IdmapSet,
    backend: &'a B,
    probe: &'a VfsCapsProbe,
}

impl<'a, B: FsBackend> Shifter<'a, B> {
    /// Create a shifter; `probe` caches the VFS v3 capability check.
    pub const fn new(set: &'a IdmapSet, backend: &'a B, probe: &'a VfsCapsProbe) -> Self {
        Self {
            set,
            backend,
            probe,
        }
    }

    /// Shift every path below (and including) `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::NotFound`] if `dir` does not exist and
    /// [`IdmapError::ShiftFailure`] for the first path that cannot be shifted.
    pub fn run(
        &self,
        dir: &Path,
        direction: ShiftDirection,
        dry_run: bool,
        skip: Option<SkipFn<'_>>,
    ) -> IdmapResult<Vec<ShiftRecord>> {
        let root = canonical_root(dir)?;
        if fs::symlink_metadata(&root).is_err() {
            return Err(IdmapError::NotFound { path: root });
        }

        let fscaps_supported = direction == ShiftDirection::IntoNs
            && !dry_run
            && self
                .probe
                .resolve(|| self.backend.supports_vfs3_fscaps(&root));

        let mut ctx = ShiftContext {
            direction,
            dry_run,
            fscaps_supported,
            hard_links: HashSet::new(),
        };

        tracing::debug!(root = %root.display(), %direction, dry_run, "Shifting tree");

        // A symlinked root is shifted itself, never its target.
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                skip.is_none_or(|skip| {
                    !entry
                        .metadata()
                        .is_ok_and(|md| skip(&root, entry.path(), &md))
                })
            });

        let mut records = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().map_or_else(|| root.clone(), Path::to_path_buf);
                IdmapError::ShiftFailure {
                    operation: "walk",
                    path,
                    source: io::Error::from(err),
                }
            })?;

            if let Some(record) = self.shift_path(&mut ctx, entry.path())? {
                records.push(record);
            }
        }

        Ok(records)
    }

    fn shift_path(&self, ctx: &mut ShiftContext, path: &Path) -> IdmapResult<Option<ShiftRecord>> {
        let failed = |operation: &'static str| {
            move |source: io::Error| IdmapError::ShiftFailure {
                operation,
                path: path.to_path_buf(),
                source,
            }
        };

        let stat = self.backend.stat(path).map_err(failed("stat"))?;
        if stat.nlink >= 2 && !ctx.hard_links.insert((stat.dev, stat.inode)) {
            return Ok(None);
        }

        let uid = i64::from(stat.uid);
        let gid = i64::from(stat.gid);
        let (new_uid, new_gid) = self.set.shift_ids(uid, gid, ctx.direction);
        let record = ShiftRecord {
            path: path.to_path_buf(),
            uid,
            gid,
            new_uid,
            new_gid,
        };

        if ctx.dry_run {
            tracing::info!(path = %path.display(), "Would shift to {new_uid} {new_gid}");
            return Ok(Some(record));
        }

        let caps = if stat.is_symlink() {
            None
        } else {
            self.backend.get_caps(path).map_err(failed("read capabilities of"))?
        };

        self.backend
            .chown(path, new_uid, new_gid)
            .map_err(failed("change owner of"))?;

        if !stat.is_symlink() {
            let direction = ctx.direction;
            self.backend
                .shift_acl(path, &|u, g| self.set.shift_ids(u, g, direction))
                .map_err(failed("shift ACLs of"))?;

            if let Some(caps) = caps.filter(|caps| !caps.is_empty()) {
                self.restore_caps(ctx, path, &caps)
                    .map_err(failed("restore capabilities of"))?;
            }
        }

        tracing::debug!(path = %path.display(), uid, gid, new_uid, new_gid, "Shifted");
        Ok(Some(record))
    }

    fn restore_caps(&self, ctx: &ShiftContext, path: &Path, caps: &[u8]) -> io::Result<()> {
        let root_uid = match ctx.direction {
            ShiftDirection::IntoNs if !ctx.fscaps_supported => {
                tracing::debug!(path = %path.display(), "Dropping capabilities, no VFS v3 support");
                return Ok(());
            }
            ShiftDirection::IntoNs => self.set.shift_into_ns(0, 0).0,
            ShiftDirection::FromNs => 0,
        };

        let Ok(root_uid) = u32::try_from(root_uid) else {
            tracing::warn!(path = %path.display(), "No mapping for namespace root, dropping capabilities");
            return Ok(());
        };

        self.backend.set_caps(path, caps, root_uid)
    }
}

// Expand symlinks before the final component so the walk root is canonical.
fn canonical_root(dir: &Path) -> IdmapResult<PathBuf> {
    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let expand = |path: &Path| {
        fs::canonicalize(path).map_err(|source| IdmapError::ShiftFailure {
            operation: "expand symlinks of",
            path: path.to_path_buf(),
            source,
        })
    };

    match dir.file_name() {
        Some(name) => Ok(expand(parent)?.join(name)),
        None => expand(dir),
    }
}

impl IdmapSet {
    fn shift_tree(
        &self,
        dir: &Path,
        direction: ShiftDirection,
        dry_run: bool,
        skip: Option<SkipFn<'_>>,
    ) -> IdmapResult<Vec<ShiftRecord>> {
        Shifter::new(self, &HostFs, &VFS3_FSCAPS).run(dir, direction, dry_run, skip)
    }

    /// Shift a tree from host ids into the namespace's host range.
    ///
    /// # Errors
    ///
    /// See [`Shifter::run`].
    pub fn uidshift_into_container(&self, dir: &Path, dry_run: bool) -> IdmapResult<Vec<ShiftRecord>> {
        self.shift_tree(dir, ShiftDirection::IntoNs, dry_run, None)
    }

    /// Shift a tree back out of the namespace.
    ///
    /// # Errors
    ///
    /// See [`Shifter::run`].
    pub fn uidshift_from_container(&self, dir: &Path, dry_run: bool) -> IdmapResult<Vec<ShiftRecord>> {
        self.shift_tree(dir, ShiftDirection::FromNs, dry_run, None)
    }

    /// Shift a container rootfs into the namespace.
    ///
    /// # Errors
    ///
    /// See [`Shifter::run`].
    pub fn shift_rootfs(&self, dir: &Path, skip: Option<SkipFn<'_>>) -> IdmapResult<Vec<ShiftRecord>> {
        self.shift_tree(dir, ShiftDirection::IntoNs, false, skip)
    }

    /// Shift a container rootfs back out of the namespace.
    ///
    /// # Errors
    ///
    /// See [`Shifter::run`].
    pub fn unshift_rootfs(&self, dir: &Path, skip: Option<SkipFn<'_>>) -> IdmapResult<Vec<ShiftRecord>> {
        self.shift_tree(dir, ShiftDirection::FromNs, false, skip)
    }

    /// Shift a single file into the namespace.
    ///
    /// # Errors
    ///
    /// See [`Shifter::run`].
    pub fn shift_file(&self, path: &Path) -> IdmapResult<Vec<ShiftRecord>> {
        self.shift_rootfs(path, None)
    }
}
