//! Normalized, contiguous id ranges.

use super::entry::{IdmapEntry, cmp_by_class_then_nsid};

/// A contiguous, inclusive range of namespace ids for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdRange {
    /// Range of user ids.
    pub is_uid: bool,
    /// Range of group ids.
    pub is_gid: bool,
    /// First id (inclusive).
    pub start_id: i64,
    /// Last id (inclusive).
    pub end_id: i64,
}

impl IdRange {
    /// Whether `id` lies within the range.
    #[must_use]
    pub const fn contains(&self, id: i64) -> bool {
        id >= self.start_id && id <= self.end_id
    }

    /// Number of ids in the range.
    #[must_use]
    pub const fn len(&self) -> i64 {
        self.end_id - self.start_id + 1
    }

    /// Whether the range holds no ids.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end_id < self.start_id
    }
}

/// Merge entries into the minimal set of contiguous ranges per class.
///
/// Works on a sorted copy; the caller's slice is left as is.
#[must_use]
pub fn valid_ranges(entries: &[IdmapEntry]) -> Vec<IdRange> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(cmp_by_class_then_nsid);

    let mut ranges: Vec<IdRange> = Vec::new();
    for entry in &sorted {
        let adjacent = ranges.iter_mut().find(|r| {
            r.is_uid == entry.is_uid && r.is_gid == entry.is_gid && r.end_id + 1 == entry.ns_id
        });

        match adjacent {
            Some(range) => range.end_id += entry.map_range,
            None => ranges.push(IdRange {
                is_uid: entry.is_uid,
                is_gid: entry.is_gid,
                start_id: entry.ns_id,
                end_id: entry.ns_id + entry.map_range - 1,
            }),
        }
    }

    ranges
}
