//! A single namespace-to-host mapping segment.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use idshift_common::{IdmapError, IdmapResult};

use super::range::IdRange;

/// Size of the unsigned 32-bit id domain.
pub const ID_DOMAIN: i64 = 1 << 32;

/// One contiguous mapping segment for uids, gids or both.
///
/// An entry with both classes set behaves as two co-located entries sharing
/// identical bounds.
///
/// Deserialized entries are validated like [`IdmapEntry::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEntry")]
pub struct IdmapEntry {
    /// Maps user ids.
    #[serde(rename = "isuid")]
    pub is_uid: bool,
    /// Maps group ids.
    #[serde(rename = "isgid")]
    pub is_gid: bool,
    /// First id as seen inside the namespace.
    #[serde(rename = "nsid")]
    pub ns_id: i64,
    /// First id as seen on the host.
    #[serde(rename = "hostid")]
    pub host_id: i64,
    /// Number of ids mapped.
    #[serde(rename = "maprange")]
    pub map_range: i64,
}

// Unvalidated JSON form, also accepting capitalised keys.
#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "isuid", alias = "Isuid")]
    is_uid: bool,
    #[serde(rename = "isgid", alias = "Isgid")]
    is_gid: bool,
    #[serde(rename = "nsid", alias = "Nsid")]
    ns_id: i64,
    #[serde(rename = "hostid", alias = "Hostid")]
    host_id: i64,
    #[serde(rename = "maprange", alias = "Maprange")]
    map_range: i64,
}

impl TryFrom<RawEntry> for IdmapEntry {
    type Error = IdmapError;

    fn try_from(raw: RawEntry) -> IdmapResult<Self> {
        Self::new(raw.is_uid, raw.is_gid, raw.ns_id, raw.host_id, raw.map_range)
    }
}

impl IdmapEntry {
    /// Create a validated entry.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::MalformedEntry`] if no class is set, the range is
    /// empty, or either span leaves the 32-bit id domain.
    pub fn new(
        is_uid: bool,
        is_gid: bool,
        ns_id: i64,
        host_id: i64,
        map_range: i64,
    ) -> IdmapResult<Self> {
        let entry = Self {
            is_uid,
            is_gid,
            ns_id,
            host_id,
            map_range,
        };
        entry.validate()?;
        Ok(entry)
    }

    fn validate(&self) -> IdmapResult<()> {
        if !self.is_uid && !self.is_gid {
            return Err(IdmapError::malformed(self.describe(), "no id class"));
        }
        if self.map_range <= 0 {
            return Err(IdmapError::malformed(self.describe(), "empty range"));
        }
        if !(0..ID_DOMAIN).contains(&self.ns_id) || !(0..ID_DOMAIN).contains(&self.host_id) {
            return Err(IdmapError::malformed(self.describe(), "id out of range"));
        }
        if self.host_id + self.map_range >= ID_DOMAIN || self.ns_id + self.map_range >= ID_DOMAIN {
            return Err(IdmapError::malformed(self.describe(), "id wraparound"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} {} {} {}",
            self.class_char(),
            self.ns_id,
            self.host_id,
            self.map_range
        )
    }

    const fn class_char(&self) -> char {
        match (self.is_uid, self.is_gid) {
            (true, true) => 'b',
            (true, false) => 'u',
            _ => 'g',
        }
    }

    /// Whether both entries map at least one common id class.
    #[must_use]
    pub const fn shares_class(&self, other: &Self) -> bool {
        (self.is_uid && other.is_uid) || (self.is_gid && other.is_gid)
    }

    /// Last host id covered (inclusive).
    #[must_use]
    pub const fn host_end(&self) -> i64 {
        self.host_id + self.map_range - 1
    }

    /// Last namespace id covered (inclusive).
    #[must_use]
    pub const fn ns_end(&self) -> i64 {
        self.ns_id + self.map_range - 1
    }

    /// Whether two entries of a common class overlap in host or namespace ids.
    ///
    /// All bounds are inclusive.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        if !self.shares_class(other) {
            return false;
        }

        within(self.host_id, other.host_id, other.host_end())
            || within(other.host_id, self.host_id, self.host_end())
            || within(self.host_end(), other.host_id, other.host_end())
            || within(other.host_end(), self.host_id, self.host_end())
            || within(self.ns_id, other.ns_id, other.ns_end())
            || within(other.ns_id, self.ns_id, self.ns_end())
            || within(self.ns_end(), other.ns_id, other.ns_end())
            || within(other.ns_end(), self.ns_id, self.ns_end())
    }

    /// Whether two entries of a common class overlap in host ids.
    ///
    /// Spans are compared as `[start, start + range)`, so an entry ending
    /// exactly where the other begins still counts. Safe merging relies on
    /// this being stricter than [`IdmapEntry::intersects`].
    #[must_use]
    pub const fn hostids_intersect(&self, other: &Self) -> bool {
        if !self.shares_class(other) {
            return false;
        }

        let self_end = self.host_id + self.map_range;
        let other_end = other.host_id + other.map_range;

        between(self.host_id, other.host_id, other_end)
            || between(other.host_id, self.host_id, self_end)
            || between(self_end, other.host_id, other_end)
            || between(other_end, self.host_id, self_end)
    }

    /// Whether every host id this entry claims lies inside a single allowed
    /// range of the same class.
    #[must_use]
    pub fn host_ids_covered_by(&self, allowed_uids: &[Self], allowed_gids: &[Self]) -> bool {
        if !self.is_uid && !self.is_gid {
            return false;
        }

        let covered = |allowed: &[Self], want_uid: bool| {
            allowed.iter().any(|a| {
                (if want_uid { a.is_uid } else { a.is_gid })
                    && self.host_id >= a.host_id
                    && self.host_id + self.map_range <= a.host_id + a.map_range
            })
        };

        (!self.is_uid || covered(allowed_uids, true)) && (!self.is_gid || covered(allowed_gids, false))
    }

    /// Check the entry against the ranges granted to the running kernel.
    ///
    /// # Errors
    ///
    /// Returns [`IdmapError::Unusable`] if any claimed class is not fully
    /// covered by one kernel range.
    pub fn usable_in(&self, kernel_ranges: &[IdRange]) -> IdmapResult<()> {
        let fits = |want_uid: bool| {
            kernel_ranges.iter().any(|r| {
                (if want_uid { r.is_uid } else { r.is_gid })
                    && r.contains(self.host_id)
                    && r.contains(self.host_end())
            })
        };

        if (self.is_uid && !fits(true)) || (self.is_gid && !fits(false)) {
            return Err(IdmapError::Unusable {
                entry: self.to_string(),
            });
        }

        Ok(())
    }

    /// Check the entry against the live kernel map of this process.
    ///
    /// # Errors
    ///
    /// Fails if the kernel map cannot be read or does not cover the entry.
    pub fn usable(&self) -> IdmapResult<()> {
        let kernel = super::discovery::current_idmap_set()?;
        self.usable_in(&kernel.valid_ranges())
    }

    /// Translate a namespace id to the host, e.g. 0 -> 100000.
    #[must_use]
    pub const fn shift_into_ns(&self, id: i64) -> Option<i64> {
        if id < self.ns_id || id >= self.ns_id + self.map_range {
            return None;
        }
        Some(id - self.ns_id + self.host_id)
    }

    /// Translate a host id back to the namespace, e.g. 100000 -> 0.
    #[must_use]
    pub const fn shift_from_ns(&self, id: i64) -> Option<i64> {
        if id < self.host_id || id >= self.host_id + self.map_range {
            return None;
        }
        Some(id - self.host_id + self.ns_id)
    }

    /// The uid half of this entry, if it maps uids.
    #[must_use]
    pub const fn uid_part(&self) -> Option<Self> {
        if !self.is_uid {
            return None;
        }
        Some(Self {
            is_gid: false,
            ..*self
        })
    }

    /// The gid half of this entry, if it maps gids.
    #[must_use]
    pub const fn gid_part(&self) -> Option<Self> {
        if !self.is_gid {
            return None;
        }
        Some(Self {
            is_uid: false,
            ..*self
        })
    }

    /// Split into single-class entries, uid first.
    pub fn split_classes(&self) -> impl Iterator<Item = Self> {
        self.uid_part().into_iter().chain(self.gid_part())
    }

    /// Render in LXC notation, one line per class.
    #[must_use]
    pub fn to_lxc_strings(&self) -> Vec<String> {
        self.split_classes()
            .map(|e| format!("{} {} {} {}", e.class_char(), e.ns_id, e.host_id, e.map_range))
            .collect()
    }
}

/// Ordering used for sorting sets: uid entries first, then gid, then by nsid.
#[must_use]
pub fn cmp_by_class_then_nsid(a: &IdmapEntry, b: &IdmapEntry) -> Ordering {
    b.is_uid
        .cmp(&a.is_uid)
        .then(b.is_gid.cmp(&a.is_gid))
        .then(a.ns_id.cmp(&b.ns_id))
}

const fn within(x: i64, low: i64, high: i64) -> bool {
    x >= low && x <= high
}

const fn between(x: i64, low: i64, high: i64) -> bool {
    x >= low && x < high
}

impl fmt::Display for IdmapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lxc_strings().join("\n"))
    }
}

impl FromStr for IdmapEntry {
    type Err = IdmapError;

    /// Parse `<u|g|b> <nsid> <hostid> <maprange>`, separated by spaces or by
    /// colons as in `b:0:100000:65536`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = if s.contains(':') {
            s.trim().split(':').collect()
        } else {
            s.split_whitespace().collect()
        };

        let [class, ns_id, host_id, map_range] = fields[..] else {
            return Err(IdmapError::malformed(s, "expected 4 fields"));
        };

        let (is_uid, is_gid) = match class {
            "u" => (true, false),
            "g" => (false, true),
            "b" => (true, true),
            _ => return Err(IdmapError::malformed(s, format!("bad idmap type {class:?}"))),
        };

        let number = |field: &str| {
            field
                .parse::<u32>()
                .map(i64::from)
                .map_err(|e| IdmapError::malformed(s, format!("{field:?}: {e}")))
        };
        let ns_id = number(ns_id)?;
        let host_id = number(host_id)?;
        let map_range = number(map_range)?;

        Self::new(is_uid, is_gid, ns_id, host_id, map_range).map_err(|err| match err {
            IdmapError::MalformedEntry { reason, .. } => IdmapError::malformed(s, reason),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uid(ns_id: i64, host_id: i64, map_range: i64) -> IdmapEntry {
        IdmapEntry::new(true, false, ns_id, host_id, map_range).unwrap()
    }

    fn gid(ns_id: i64, host_id: i64, map_range: i64) -> IdmapEntry {
        IdmapEntry::new(false, true, ns_id, host_id, map_range).unwrap()
    }

    #[test]
    fn parse_and_render_round_trip() {
        let entry: IdmapEntry = "u 0 100000 65536".parse().unwrap();
        assert_eq!(entry, uid(0, 100_000, 65536));
        assert_eq!(entry.to_string(), "u 0 100000 65536");
    }

    #[test]
    fn parse_colon_form() {
        let entry: IdmapEntry = "b:0:100000:65536".parse().unwrap();
        assert!(entry.is_uid && entry.is_gid);
        insta::assert_snapshot!(entry.to_string(), @r"
        u 0 100000 65536
        g 0 100000 65536
        ");
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in [
            "u 0 100000",
            "u:0:100000:65536:1",
            "x 0 100000 65536",
            "u 0 abc 65536",
            "u -1 100000 65536",
            "u 0 4294967295 1",
            "g 4294967000 0 1000",
            "u 0 100000 0",
            "",
        ] {
            let err = bad.parse::<IdmapEntry>().unwrap_err();
            assert!(matches!(err, IdmapError::MalformedEntry { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn new_rejects_classless_entry() {
        assert!(IdmapEntry::new(false, false, 0, 0, 1).is_err());
    }

    #[test]
    fn intersects_requires_shared_class() {
        let u = uid(0, 100_000, 1000);
        let g = gid(0, 100_000, 1000);
        assert!(!u.intersects(&g));
        assert!(u.intersects(&uid(500, 500_000, 10)));
        assert!(u.intersects(&uid(5000, 100_999, 10)));
        assert!(!u.intersects(&uid(1000, 101_000, 10)));
    }

    #[test]
    fn hostids_intersect_counts_touching_ranges() {
        let a = uid(0, 100_000, 1000);
        // Touching in host space: not an inclusive overlap, but a host id conflict.
        let b = uid(5000, 101_000, 10);
        assert!(!a.intersects(&b));
        assert!(a.hostids_intersect(&b));
        assert!(!a.hostids_intersect(&uid(0, 200_000, 10)));
    }

    #[test]
    fn host_ids_covered_by_checks_each_class() {
        let allowed_uids = [uid(0, 100_000, 65536)];
        let allowed_gids = [gid(0, 200_000, 65536)];

        let both = IdmapEntry::new(true, true, 0, 100_000, 10).unwrap();
        assert!(uid(0, 100_010, 100).host_ids_covered_by(&allowed_uids, &allowed_gids));
        assert!(!both.host_ids_covered_by(&allowed_uids, &allowed_gids));
        assert!(!uid(0, 165_000, 1000).host_ids_covered_by(&allowed_uids, &allowed_gids));
        assert!(gid(5, 200_000, 65536).host_ids_covered_by(&allowed_uids, &allowed_gids));
    }

    #[test]
    fn usable_in_requires_full_cover() {
        let kernel = [
            IdRange {
                is_uid: true,
                is_gid: false,
                start_id: 0,
                end_id: 65535,
            },
            IdRange {
                is_uid: false,
                is_gid: true,
                start_id: 0,
                end_id: 65535,
            },
        ];
        assert!(uid(0, 1000, 1000).usable_in(&kernel).is_ok());
        let err = uid(0, 65000, 1000).usable_in(&kernel).unwrap_err();
        assert!(matches!(err, IdmapError::Unusable { .. }));
        assert!(gid(0, 65536, 1).usable_in(&kernel).is_err());
    }

    #[test]
    fn shift_outside_entry_is_none() {
        let e = uid(0, 100_000, 10);
        assert_eq!(e.shift_into_ns(3), Some(100_003));
        assert_eq!(e.shift_into_ns(10), None);
        assert_eq!(e.shift_from_ns(100_009), Some(9));
        assert_eq!(e.shift_from_ns(99_999), None);
    }

    #[test]
    fn json_uses_lowercase_keys() {
        let json = serde_json::to_string(&uid(0, 100_000, 65536)).unwrap();
        assert_eq!(
            json,
            r#"{"isuid":true,"isgid":false,"nsid":0,"hostid":100000,"maprange":65536}"#
        );
        let back: IdmapEntry =
            serde_json::from_str(r#"{"Isuid":true,"Isgid":false,"Hostid":100000,"Nsid":0,"Maprange":65536}"#)
                .unwrap();
        assert_eq!(back, uid(0, 100_000, 65536));
    }

    proptest! {
        #[test]
        fn shift_round_trip(
            ns_id in 0i64..1_000_000,
            host_id in 0i64..1_000_000,
            map_range in 1i64..1_000_000,
            offset in 0i64..1_000_000,
        ) {
            let e = uid(ns_id, host_id, map_range);
            let x = host_id + offset % map_range;
            let ns = e.shift_from_ns(x).unwrap();
            prop_assert_eq!(e.shift_into_ns(ns), Some(x));
        }
    }
}
