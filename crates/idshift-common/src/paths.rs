//! Locations of the kernel and shadow ID map sources.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Directory holding the calling process's kernel maps (default: /proc/self).
pub static PROC_SELF_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("IDSHIFT_PROC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/proc/self"))
});

/// Directory holding the subordinate id files (default: /etc).
pub static ETC_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("IDSHIFT_ETC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc"))
});

/// The four text sources the mapping subsystem reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Kernel uid map of the calling process.
    pub uid_map: PathBuf,
    /// Kernel gid map of the calling process.
    pub gid_map: PathBuf,
    /// Administrator-granted subordinate uids.
    pub subuid: PathBuf,
    /// Administrator-granted subordinate gids.
    pub subgid: PathBuf,
}

impl HostPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths rooted at custom proc and etc directories.
    #[must_use]
    pub fn with_dirs(proc_dir: impl AsRef<Path>, etc_dir: impl AsRef<Path>) -> Self {
        let proc_dir = proc_dir.as_ref();
        let etc_dir = etc_dir.as_ref();
        Self {
            uid_map: proc_dir.join("uid_map"),
            gid_map: proc_dir.join("gid_map"),
            subuid: etc_dir.join("subuid"),
            subgid: etc_dir.join("subgid"),
        }
    }

    /// Re-root the shadow files below a container rootfs.
    ///
    /// The kernel maps always describe the calling process, so only the
    /// subuid/subgid paths move. An empty prefix leaves the paths unchanged.
    #[must_use]
    pub fn with_rootfs(&self, rootfs: impl AsRef<Path>) -> Self {
        let rootfs = rootfs.as_ref();
        if rootfs.as_os_str().is_empty() {
            return self.clone();
        }

        Self {
            subuid: reroot(rootfs, &self.subuid),
            subgid: reroot(rootfs, &self.subgid),
            ..self.clone()
        }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::with_dirs(PROC_SELF_DIR.as_path(), ETC_DIR.as_path())
    }
}

// Path::join discards the prefix for absolute paths
fn reroot(rootfs: &Path, path: &Path) -> PathBuf {
    rootfs.join(path.strip_prefix("/").unwrap_or(path))
}
