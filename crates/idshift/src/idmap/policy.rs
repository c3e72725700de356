//! Choosing the default id map for unprivileged containers.

use std::fs;

use idshift_common::paths::ETC_DIR;
use idshift_common::{HostPaths, IdmapError, IdmapResult};

use super::discovery::{current_idmap_set_with, read_shadow_map};
use super::entry::IdmapEntry;
use super::range::IdRange;
use super::set::IdmapSet;

/// Smallest subordinate range worth using for a container.
pub const MIN_MAP_SIZE: i64 = 65536;

/// Ids below this belong to the system's own POSIX allocation.
pub const SYSTEM_ID_CEILING: i64 = 100_000;

/// Host id where the hardcoded fallback map starts.
pub const FALLBACK_HOST_ID: i64 = 1_000_000;

/// Size of the hardcoded fallback map.
pub const FALLBACK_MAP_RANGE: i64 = 1_000_000_000;

/// Last id of a fully privileged kernel map (`0 0 4294967295`).
const FULL_RANGE_END: i64 = 4_294_967_294;

/// Build the default map for `username` from the default host locations.
///
/// # Errors
///
/// See [`default_idmap_set_with`].
pub fn default_idmap_set(rootfs: &str, username: &str) -> IdmapResult<IdmapSet> {
    default_idmap_set_with(&HostPaths::default(), rootfs, username)
}

/// Build the default map for `username` (the current user when empty).
///
/// Only the first subordinate range of at least [`MIN_MAP_SIZE`] ids is used
/// per class. Without subuid/subgid files, or for a root user with no entry,
/// the map is derived from the kernel instead.
///
/// # Errors
///
/// Returns [`IdmapError::NoUserMap`] for a non-root user without an entry, or
/// any error reading the sources.
pub fn default_idmap_set_with(
    paths: &HostPaths,
    rootfs: &str,
    username: &str,
) -> IdmapResult<IdmapSet> {
    let username = if username.is_empty() {
        current_username()?
    } else {
        username.to_string()
    };

    let paths = paths.with_rootfs(rootfs);
    if !paths.subuid.exists() || !paths.subgid.exists() {
        return Ok(kernel_default_map_with(&paths));
    }

    let mut set = IdmapSet::new();
    for (is_uid, path) in [(true, &paths.subuid), (false, &paths.subgid)] {
        let ranges = match read_shadow_map(path, &username) {
            Ok(ranges) => ranges,
            Err(err) if err.is_no_user_map() && username == "root" => {
                tracing::debug!(path = %path.display(), "No root map available, using kernel map");
                return Ok(kernel_default_map_with(&paths));
            }
            Err(err) => return Err(err),
        };

        // Multiple shadow ranges are not supported, the first big one wins.
        if let Some(range) = ranges.iter().find(|r| r.size >= MIN_MAP_SIZE) {
            set.push(IdmapEntry {
                is_uid,
                is_gid: !is_uid,
                ns_id: 0,
                host_id: range.start,
                map_range: range.size,
            });
        }
    }

    Ok(set)
}

/// Derive a default map from the ids granted to this process by the kernel.
#[must_use]
pub fn kernel_default_map_with(paths: &HostPaths) -> IdmapSet {
    let kernel = match current_idmap_set_with(paths) {
        Ok(kernel) => kernel,
        Err(err) => {
            tracing::debug!(error = %err, "Kernel map unavailable, using fallback map");
            return fallback_map();
        }
    };

    let ranges = kernel.valid_ranges();
    if is_full_kernel_range(&ranges) {
        return fallback_map();
    }

    let mut set = IdmapSet::new();
    for is_uid in [true, false] {
        let usable = ranges
            .iter()
            .filter(|r| if is_uid { r.is_uid } else { r.is_gid })
            .find_map(|r| {
                if r.end_id < SYSTEM_ID_CEILING {
                    return None;
                }
                let start_id = r.start_id.max(SYSTEM_ID_CEILING);
                let size = r.end_id - start_id + 1;
                (size >= MIN_MAP_SIZE).then_some((start_id, size))
            });

        if let Some((host_id, map_range)) = usable {
            set.push(IdmapEntry {
                is_uid,
                is_gid: !is_uid,
                ns_id: 0,
                host_id,
                map_range,
            });
        }
    }

    set
}

fn is_full_kernel_range(ranges: &[IdRange]) -> bool {
    let full = |is_uid: bool| IdRange {
        is_uid,
        is_gid: !is_uid,
        start_id: 0,
        end_id: FULL_RANGE_END,
    };
    ranges == [full(true), full(false)]
}

fn fallback_map() -> IdmapSet {
    [true, false]
        .into_iter()
        .map(|is_uid| IdmapEntry {
            is_uid,
            is_gid: !is_uid,
            ns_id: 0,
            host_id: FALLBACK_HOST_ID,
            map_range: FALLBACK_MAP_RANGE,
        })
        .collect()
}

/// Read the allocation for unprivileged containers from the default locations.
///
/// Returns `None` when only privileged containers can run.
#[must_use]
pub fn get_idmap_set() -> Option<IdmapSet> {
    select_idmap_set(&HostPaths::default(), "")
}

/// Pick the default map for `username` and check it against the live kernel.
///
/// Failures never propagate: if no usable map exists a warning is logged and
/// `None` is returned, leaving only privileged execution available.
#[must_use]
pub fn select_idmap_set(paths: &HostPaths, username: &str) -> Option<IdmapSet> {
    let set = match default_idmap_set_with(paths, "", username) {
        Ok(set) => set,
        Err(err) => {
            tracing::warn!(error = %err, "Error reading default uid/gid map");
            tracing::warn!("Only privileged containers will be able to run");
            return None;
        }
    };

    let kernel = current_idmap_set_with(paths).ok();
    if let Some(kernel) = &kernel {
        tracing::info!("Kernel uid/gid map:");
        for line in kernel.to_lxc_strings() {
            tracing::info!(" - {line}");
        }
    }

    if set.is_empty() {
        tracing::warn!("No available uid/gid map could be found");
        tracing::warn!("Only privileged containers will be able to run");
        return None;
    }

    let kernel_ranges = kernel.map(|k| k.valid_ranges()).unwrap_or_default();
    tracing::info!("Configured uid/gid map:");
    for entry in &set {
        let suffix = if entry.usable_in(&kernel_ranges).is_err() {
            " (unusable)"
        } else {
            ""
        };
        for line in entry.to_lxc_strings() {
            tracing::info!(" - {line}{suffix}");
        }
    }

    if let Err(err) = set.usable_in(&kernel_ranges) {
        tracing::warn!(error = %err, "One or more uid/gid map entry isn't usable (typically due to nesting)");
        tracing::warn!("Only privileged containers will be able to run");
        return None;
    }

    Some(set)
}

/// Name of the user running this process, looked up in `passwd`.
///
/// # Errors
///
/// Returns [`IdmapError::Config`] if the uid has no `passwd` entry and
/// `USER` is unset.
pub fn current_username() -> IdmapResult<String> {
    let uid = rustix::process::getuid().as_raw();
    let passwd = fs::read_to_string(ETC_DIR.join("passwd")).unwrap_or_default();

    let from_passwd = passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        let line_uid = fields.get(2)?.parse::<u32>().ok()?;
        (line_uid == uid).then(|| fields[0].to_string())
    });

    from_passwd
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| IdmapError::Config {
            message: format!("unable to determine the user name for uid {uid}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("proc")).unwrap();
            fs::create_dir_all(dir.path().join("etc")).unwrap();
            Self { dir }
        }

        fn proc(self, uid_map: &str, gid_map: &str) -> Self {
            fs::write(self.dir.path().join("proc/uid_map"), uid_map).unwrap();
            fs::write(self.dir.path().join("proc/gid_map"), gid_map).unwrap();
            self
        }

        fn shadow(self, subuid: &str, subgid: &str) -> Self {
            fs::write(self.dir.path().join("etc/subuid"), subuid).unwrap();
            fs::write(self.dir.path().join("etc/subgid"), subgid).unwrap();
            self
        }

        fn paths(&self) -> HostPaths {
            HostPaths::with_dirs(self.dir.path().join("proc"), self.dir.path().join("etc"))
        }
    }

    fn entry(is_uid: bool, host_id: i64, map_range: i64) -> IdmapEntry {
        IdmapEntry::new(is_uid, !is_uid, 0, host_id, map_range).unwrap()
    }

    const FULL: &str = "0 0 4294967295\n";

    #[test]
    fn shadow_ranges_for_user() {
        let fx = Fixture::new().shadow("alice:100000:65536\n", "alice:200000:65536\n");
        let set = default_idmap_set_with(&fx.paths(), "", "alice").unwrap();
        assert_eq!(
            set.entries(),
            &[entry(true, 100_000, 65536), entry(false, 200_000, 65536)]
        );
    }

    #[test]
    fn undersized_ranges_are_skipped() {
        let fx = Fixture::new().shadow(
            "alice:100000:1000\nalice:300000:65536\nalice:500000:65536\n",
            "alice:200000:100\n",
        );
        let set = default_idmap_set_with(&fx.paths(), "", "alice").unwrap();
        assert_eq!(set.entries(), &[entry(true, 300_000, 65536)]);
    }

    #[test]
    fn missing_user_is_fatal_except_for_root() {
        let fx = Fixture::new()
            .shadow("alice:100000:65536\n", "alice:100000:65536\n")
            .proc(FULL, FULL);

        let err = default_idmap_set_with(&fx.paths(), "", "bob").unwrap_err();
        assert!(err.is_no_user_map());

        let set = default_idmap_set_with(&fx.paths(), "", "root").unwrap();
        assert_eq!(set, fallback_map());
    }

    #[test]
    fn rootfs_prefix_is_honoured() {
        let fx = Fixture::new();
        let rootfs = fx.dir.path().join("rootfs");
        fs::create_dir_all(rootfs.join("etc")).unwrap();
        fs::write(rootfs.join("etc/subuid"), "alice:400000:65536\n").unwrap();
        fs::write(rootfs.join("etc/subgid"), "alice:400000:65536\n").unwrap();

        let paths = HostPaths::with_dirs(fx.dir.path().join("proc"), "/etc");
        let set = default_idmap_set_with(&paths, rootfs.to_str().unwrap(), "alice").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.shift_into_ns(0, 0), (400_000, 400_000));
    }

    #[test]
    fn full_kernel_range_uses_fallback() {
        let fx = Fixture::new().proc(FULL, FULL);
        let set = kernel_default_map_with(&fx.paths());
        assert_eq!(
            set.entries(),
            &[
                entry(true, FALLBACK_HOST_ID, FALLBACK_MAP_RANGE),
                entry(false, FALLBACK_HOST_ID, FALLBACK_MAP_RANGE),
            ]
        );
    }

    #[test]
    fn unreadable_kernel_map_uses_fallback() {
        let fx = Fixture::new().proc("", "");
        assert_eq!(kernel_default_map_with(&fx.paths()), fallback_map());
    }

    #[test]
    fn kernel_ranges_are_clamped_above_system_ids() {
        let fx = Fixture::new().proc("0 1000 1\n1 100000 200000\n", "0 1000 50000\n");
        let set = kernel_default_map_with(&fx.paths());
        // uid range 0..=200000 is clamped to start at 100000; gid range is too small.
        assert_eq!(set.entries(), &[entry(true, 100_000, 100_001)]);
    }

    #[test]
    fn select_keeps_usable_map() {
        let fx = Fixture::new()
            .proc(FULL, FULL)
            .shadow("alice:100000:65536\n", "alice:200000:65536\n");
        let set = select_idmap_set(&fx.paths(), "alice").unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test_log::test]
    fn select_disables_unusable_map() {
        let fx = Fixture::new()
            .proc("0 1000 1\n", "0 1000 1\n")
            .shadow("alice:100000:65536\n", "alice:200000:65536\n");
        assert!(select_idmap_set(&fx.paths(), "alice").is_none());
    }

    #[test]
    fn select_disables_on_error_or_empty_map() {
        let fx = Fixture::new().proc(FULL, FULL).shadow("alice:1:1\n", "alice:1:1\n");
        assert!(select_idmap_set(&fx.paths(), "bob").is_none());
        assert!(select_idmap_set(&fx.paths(), "alice").is_none());
    }
}
