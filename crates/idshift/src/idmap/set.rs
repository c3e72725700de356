//! Ordered collections of idmap entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use idshift_common::{IdmapError, IdmapResult};

use super::entry::{IdmapEntry, cmp_by_class_then_nsid};
use super::range::{IdRange, valid_ranges};

/// Which way ids are translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftDirection {
    /// Namespace id to host id.
    IntoNs,
    /// Host id to namespace id.
    FromNs,
}

impl fmt::Display for ShiftDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntoNs => write!(f, "in"),
            Self::FromNs => write!(f, "out"),
        }
    }
}

/// One `(container id, host id, size)` triple as written to
/// `/proc/<pid>/uid_map` or `gid_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    /// Container ID (start of range).
    pub container_id: u32,
    /// Host ID (start of range).
    pub host_id: u32,
    /// Size of the range.
    pub size: u32,
}

impl IdMapping {
    /// Format for /proc/<pid>/uid_map or gid_map.
    #[must_use]
    pub fn to_proc_format(&self) -> String {
        format!("{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// An ordered sequence of idmap entries.
///
/// Order matters: translations use the first entry of a class that applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdmapSet {
    entries: Vec<IdmapEntry>,
}

impl IdmapSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a set holding `entries` in the given order.
    #[must_use]
    pub const fn from_entries(entries: Vec<IdmapEntry>) -> Self {
        Self { entries }
    }

    /// The entries, in order.
    #[must_use]
    pub fn entries(&self) -> &[IdmapEntry] {
        &self.entries
    }

    /// Consume the set, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<IdmapEntry> {
        self.entries
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, IdmapEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, entry: IdmapEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn replace_entries(&mut self, entries: Vec<IdmapEntry>) {
        self.entries = entries;
    }

    /// Whether any entry [intersects](IdmapEntry::intersects) `entry`.
    #[must_use]
    pub fn intersects(&self, entry: &IdmapEntry) -> bool {
        self.entries.iter().any(|e| entry.intersects(e))
    }

    /// Whether any entry's host ids overlap those of `entry`.
    #[must_use]
    pub fn hostids_intersect(&self, entry: &IdmapEntry) -> bool {
        self.entries.iter().any(|e| entry.hostids_intersect(e))
    }

    /// Minimal contiguous namespace-id ranges per class.
    #[must_use]
    pub fn valid_ranges(&self) -> Vec<IdRange> {
        valid_ranges(&self.entries)
    }

    /// Check every entry against the given kernel ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`IdmapError::Unusable`] found.
    pub fn usable_in(&self, kernel_ranges: &[IdRange]) -> IdmapResult<()> {
        self.entries.iter().try_for_each(|e| e.usable_in(kernel_ranges))
    }

    /// Check every entry against the live kernel map of this process.
    ///
    /// # Errors
    ///
    /// Fails if the kernel map cannot be read or an entry is not covered.
    pub fn usable(&self) -> IdmapResult<()> {
        let kernel = super::discovery::current_idmap_set()?;
        self.usable_in(&kernel.valid_ranges())
    }

    /// Translate a uid/gid pair in `direction`.
    ///
    /// For each class the first entry that applies wins; a class with no
    /// applicable entry yields `-1`.
    #[must_use]
    pub fn shift_ids(&self, uid: i64, gid: i64, direction: ShiftDirection) -> (i64, i64) {
        let shift = |e: &IdmapEntry, id| match direction {
            ShiftDirection::IntoNs => e.shift_into_ns(id),
            ShiftDirection::FromNs => e.shift_from_ns(id),
        };

        let mut u = None;
        let mut g = None;
        for e in &self.entries {
            if e.is_uid && u.is_none() {
                u = shift(e, uid);
            }
            if e.is_gid && g.is_none() {
                g = shift(e, gid);
            }
        }

        (u.unwrap_or(-1), g.unwrap_or(-1))
    }

    /// Translate namespace ids to host ids.
    #[must_use]
    pub fn shift_into_ns(&self, uid: i64, gid: i64) -> (i64, i64) {
        self.shift_ids(uid, gid, ShiftDirection::IntoNs)
    }

    /// Translate host ids to namespace ids.
    #[must_use]
    pub fn shift_from_ns(&self, uid: i64, gid: i64) -> (i64, i64) {
        self.shift_ids(uid, gid, ShiftDirection::FromNs)
    }

    /// Render every entry in LXC notation, dropping duplicate lines.
    #[must_use]
    pub fn to_lxc_strings(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        for line in self.entries.iter().flat_map(IdmapEntry::to_lxc_strings) {
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Uid triples for configuring a new user namespace.
    #[must_use]
    pub fn uid_mappings(&self) -> Vec<IdMapping> {
        self.mappings(|e| e.is_uid)
    }

    /// Gid triples for configuring a new user namespace.
    #[must_use]
    pub fn gid_mappings(&self) -> Vec<IdMapping> {
        self.mappings(|e| e.is_gid)
    }

    fn mappings(&self, class: impl Fn(&IdmapEntry) -> bool) -> Vec<IdMapping> {
        self.entries
            .iter()
            .filter(|e| class(e))
            .filter_map(|e| {
                Some(IdMapping {
                    container_id: u32::try_from(e.ns_id).ok()?,
                    host_id: u32::try_from(e.host_id).ok()?,
                    size: u32::try_from(e.map_range).ok()?,
                })
            })
            .collect()
    }

    /// Serialize as a JSON array of entries.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> IdmapResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON array of entries.
    ///
    /// An empty array means "no map" and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::Serialization`] on malformed JSON.
    pub fn from_json(json: &str) -> IdmapResult<Option<Self>> {
        let set: Self = serde_json::from_str(json)?;
        if set.is_empty() {
            return Ok(None);
        }
        Ok(Some(set))
    }

    // Combined entries expanded into per-class entries, sorted.
    fn expanded_sorted(&self) -> Vec<IdmapEntry> {
        let mut entries: Vec<IdmapEntry> = self
            .entries
            .iter()
            .flat_map(IdmapEntry::split_classes)
            .collect();
        entries.sort_by(cmp_by_class_then_nsid);
        entries
    }
}

impl PartialEq for IdmapSet {
    fn eq(&self, other: &Self) -> bool {
        self.expanded_sorted() == other.expanded_sorted()
    }
}

impl Eq for IdmapSet {}

impl FromIterator<IdmapEntry> for IdmapSet {
    fn from_iter<I: IntoIterator<Item = IdmapEntry>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a IdmapSet {
    type Item = &'a IdmapEntry;
    type IntoIter = std::slice::Iter<'a, IdmapEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for IdmapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lxc_strings().join("\n"))
    }
}

impl TryFrom<&[&str]> for IdmapSet {
    type Error = IdmapError;

    /// Build a set by [appending](IdmapSet::append) each line in turn.
    fn try_from(lines: &[&str]) -> Result<Self, Self::Error> {
        let mut set = Self::new();
        for line in lines {
            set.append(line)?;
        }
        Ok(set)
    }
}
