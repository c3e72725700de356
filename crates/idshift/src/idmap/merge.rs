//! Strict and splitting insertion of entries into a set.

use idshift_common::{IdmapError, IdmapResult};

use super::entry::IdmapEntry;
use super::set::IdmapSet;

impl IdmapSet {
    /// Parse `text` and append it, refusing any overlap with existing entries.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::MalformedEntry`] for bad input and
    /// [`IdmapError::RangeConflict`] if the entry intersects the set. The set
    /// is unchanged on error.
    pub fn append(&mut self, text: &str) -> IdmapResult<()> {
        let entry: IdmapEntry = text.parse()?;
        if self.intersects(&entry) {
            return Err(IdmapError::RangeConflict {
                entry: entry.to_string(),
            });
        }

        self.push(entry);
        Ok(())
    }

    /// Insert `entry`, splitting existing entries whose namespace ids it
    /// overlaps.
    ///
    /// Combined uid+gid entries are inserted one class at a time.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::HostIdConflict`] if the entry's host ids overlap
    /// an existing entry it would displace. The set is unchanged on error.
    pub fn add_safe(&mut self, entry: IdmapEntry) -> IdmapResult<()> {
        let mut entries = self.entries().to_vec();
        for part in entry.split_classes() {
            entries = insert_splitting(&entries, part)?;
        }

        tracing::debug!(entry = %entry, len = entries.len(), "Merged idmap entry");
        self.replace_entries(entries);
        Ok(())
    }
}

// `new` must map exactly one class.
fn insert_splitting(entries: &[IdmapEntry], new: IdmapEntry) -> IdmapResult<Vec<IdmapEntry>> {
    let mut result = Vec::with_capacity(entries.len() + 2);
    let mut added = false;

    for existing in entries {
        if !existing.intersects(&new) {
            result.push(*existing);
            continue;
        }

        if existing.hostids_intersect(&new) {
            return Err(IdmapError::HostIdConflict);
        }

        // The other class of a combined entry is not displaced.
        let (same, other) = if new.is_uid {
            (existing.uid_part(), existing.gid_part())
        } else {
            (existing.gid_part(), existing.uid_part())
        };
        result.extend(other);
        let Some(same) = same else {
            continue;
        };

        let lower = IdmapEntry {
            map_range: new.ns_id - same.ns_id,
            ..same
        };
        let upper = IdmapEntry {
            host_id: same.host_id + lower.map_range + new.map_range,
            ns_id: new.ns_id + new.map_range,
            map_range: same.map_range - new.map_range - lower.map_range,
            ..same
        };

        if lower.map_range > 0 {
            result.push(lower);
        }
        // A span covering several entries is inserted at the first one.
        if !added {
            result.push(new);
            added = true;
        }
        if upper.map_range > 0 {
            result.push(upper);
        }
    }

    if !added {
        result.push(new);
    }

    Ok(result)
}
