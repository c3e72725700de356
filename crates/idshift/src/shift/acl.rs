//! POSIX ACL translation on the kernel's xattr representation.
//!
//! `system.posix_acl_access` and `system.posix_acl_default` hold a 4 byte
//! version header followed by 8 byte entries: tag (u16), permissions (u16)
//! and id (u32), all little endian.

use std::io;

/// Access ACL of a file or directory.
pub const XATTR_ACL_ACCESS: &str = "system.posix_acl_access";

/// Default ACL inherited by new entries of a directory.
pub const XATTR_ACL_DEFAULT: &str = "system.posix_acl_default";

const ACL_XATTR_VERSION: u32 = 2;
const HEADER_SIZE: usize = 4;
const ENTRY_SIZE: usize = 8;

const ACL_USER: u16 = 0x02;
const ACL_GROUP: u16 = 0x08;

/// Rewrite the uid of `ACL_USER` and the gid of `ACL_GROUP` entries.
///
/// `shift` takes and returns a `(uid, gid)` pair; an id it maps to `-1` is
/// left untouched. Returns `None` when nothing changed.
///
/// # Errors
///
/// Returns [`io::ErrorKind::InvalidData`] if the blob is not a version 2 ACL.
pub fn shift_acl_xattr(blob: &[u8], shift: &dyn Fn(i64, i64) -> (i64, i64)) -> io::Result<Option<Vec<u8>>> {
    if blob.len() < HEADER_SIZE || (blob.len() - HEADER_SIZE) % ENTRY_SIZE != 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed ACL xattr"));
    }

    let version = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    if version != ACL_XATTR_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported ACL xattr version {version}"),
        ));
    }

    let mut out = blob.to_vec();
    let mut changed = false;

    for entry in out[HEADER_SIZE..].chunks_exact_mut(ENTRY_SIZE) {
        let tag = u16::from_le_bytes([entry[0], entry[1]]);
        let id = i64::from(u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]));

        let shifted = match tag {
            ACL_USER => shift(id, -1).0,
            ACL_GROUP => shift(-1, id).1,
            _ => continue,
        };

        let Ok(shifted) = u32::try_from(shifted) else {
            tracing::debug!(tag, id, "No mapping for ACL entry");
            continue;
        };

        if i64::from(shifted) != id {
            entry[4..].copy_from_slice(&shifted.to_le_bytes());
            changed = true;
        }
    }

    Ok(changed.then_some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACL_USER_OBJ: u16 = 0x01;
    const ACL_MASK: u16 = 0x10;

    fn acl(entries: &[(u16, u16, u32)]) -> Vec<u8> {
        let mut blob = ACL_XATTR_VERSION.to_le_bytes().to_vec();
        for (tag, perm, id) in entries {
            blob.extend_from_slice(&tag.to_le_bytes());
            blob.extend_from_slice(&perm.to_le_bytes());
            blob.extend_from_slice(&id.to_le_bytes());
        }
        blob
    }

    fn into_ns(uid: i64, gid: i64) -> (i64, i64) {
        let shift = |id: i64| if (0..1000).contains(&id) { id + 100_000 } else { -1 };
        (shift(uid), shift(gid))
    }

    #[test]
    fn user_and_group_entries_shift() {
        let blob = acl(&[
            (ACL_USER_OBJ, 6, u32::MAX),
            (ACL_USER, 4, 33),
            (ACL_GROUP, 5, 44),
            (ACL_MASK, 7, u32::MAX),
        ]);

        let shifted = shift_acl_xattr(&blob, &into_ns).unwrap().unwrap();
        assert_eq!(
            shifted,
            acl(&[
                (ACL_USER_OBJ, 6, u32::MAX),
                (ACL_USER, 4, 100_033),
                (ACL_GROUP, 5, 100_044),
                (ACL_MASK, 7, u32::MAX),
            ])
        );
    }

    #[test]
    fn unmapped_ids_are_kept() {
        let blob = acl(&[(ACL_USER, 4, 5000), (ACL_USER_OBJ, 6, u32::MAX)]);
        assert!(shift_acl_xattr(&blob, &into_ns).unwrap().is_none());
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        assert!(shift_acl_xattr(&[2, 0, 0], &into_ns).is_err());
        assert!(shift_acl_xattr(&[1, 0, 0, 0], &into_ns).is_err());
        let mut blob = acl(&[(ACL_USER, 4, 33)]);
        blob.pop();
        assert!(shift_acl_xattr(&blob, &into_ns).is_err());
    }
}
