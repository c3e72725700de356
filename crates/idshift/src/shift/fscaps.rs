//! File capability (`security.capability`) encoding.
//!
//! Revision 3 blobs carry the uid that acts as root for the capabilities,
//! which lets a user namespace own privileged binaries.

use std::io;

/// Extended attribute holding file capabilities.
pub const XATTR_CAPS: &str = "security.capability";

const REVISION_MASK: u32 = 0xFF00_0000;
const FLAGS_EFFECTIVE: u32 = 0x0000_0001;

const REVISION_1: u32 = 0x0100_0000;
const REVISION_2: u32 = 0x0200_0000;
const REVISION_3: u32 = 0x0300_0000;

const SIZE_1: usize = 12;
const SIZE_2: usize = 20;
const SIZE_3: usize = 24;

/// Decoded file capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCaps {
    /// Capabilities are raised into the effective set on exec.
    pub effective: bool,
    /// Permitted bits, low word first.
    pub permitted: [u32; 2],
    /// Inheritable bits, low word first.
    pub inheritable: [u32; 2],
    /// Namespace root uid for revision 3 blobs.
    pub root_id: Option<u32>,
}

fn word(blob: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]])
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

impl FileCaps {
    /// Decode a revision 1, 2 or 3 blob.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] for a short blob or an unknown
    /// revision.
    pub fn decode(blob: &[u8]) -> io::Result<Self> {
        if blob.len() < 4 {
            return Err(invalid("file capabilities too short"));
        }

        let magic = word(blob, 0);
        let effective = magic & FLAGS_EFFECTIVE != 0;
        let (words, root_id) = match (magic & REVISION_MASK, blob.len()) {
            (REVISION_1, SIZE_1) => (1, None),
            (REVISION_2, SIZE_2) => (2, None),
            (REVISION_3, SIZE_3) => (2, Some(word(blob, 5))),
            _ => return Err(invalid("unsupported file capability revision")),
        };

        let mut permitted = [0; 2];
        let mut inheritable = [0; 2];
        for i in 0..words {
            permitted[i] = word(blob, 1 + i * 2);
            inheritable[i] = word(blob, 2 + i * 2);
        }

        Ok(Self {
            effective,
            permitted,
            inheritable,
            root_id,
        })
    }

    /// Replace the namespace root uid; `0` means no namespace (revision 2).
    #[must_use]
    pub const fn with_root_id(self, root_id: u32) -> Self {
        Self {
            root_id: if root_id == 0 { None } else { Some(root_id) },
            ..self
        }
    }

    /// Encode as revision 3 when a root uid is set, revision 2 otherwise.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let revision = if self.root_id.is_some() {
            REVISION_3
        } else {
            REVISION_2
        };
        let magic = revision | if self.effective { FLAGS_EFFECTIVE } else { 0 };

        let mut blob = Vec::with_capacity(SIZE_3);
        blob.extend_from_slice(&magic.to_le_bytes());
        for i in 0..2 {
            blob.extend_from_slice(&self.permitted[i].to_le_bytes());
            blob.extend_from_slice(&self.inheritable[i].to_le_bytes());
        }
        if let Some(root_id) = self.root_id {
            blob.extend_from_slice(&root_id.to_le_bytes());
        }
        blob
    }
}
