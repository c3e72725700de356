//! Filesystem primitives used by the ownership shift.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use rustix::fs::XattrFlags;
use rustix::io::Errno;

use super::acl::{XATTR_ACL_ACCESS, XATTR_ACL_DEFAULT, shift_acl_xattr};
use super::fscaps::{FileCaps, XATTR_CAPS};

/// Ownership and identity of a path, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Owning uid.
    pub uid: u32,
    /// Owning gid.
    pub gid: u32,
    /// Raw `st_mode`.
    pub mode: u32,
    /// Device holding the inode.
    pub dev: u64,
    /// Inode number.
    pub inode: u64,
    /// Hard link count.
    pub nlink: u64,
}

impl FileStat {
    /// Whether the path is a symbolic link.
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    /// Whether the path is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }
}

impl From<&fs::Metadata> for FileStat {
    fn from(md: &fs::Metadata) -> Self {
        Self {
            uid: md.uid(),
            gid: md.gid(),
            mode: md.mode(),
            dev: md.dev(),
            inode: md.ino(),
            nlink: md.nlink(),
        }
    }
}

/// Id translation applied to ACL entries.
pub type AclShift<'a> = &'a dyn Fn(i64, i64) -> (i64, i64);

/// Filesystem operations the shift engine depends on.
pub trait FsBackend {
    /// Stat `path` without following a final symlink.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Read the raw file capability blob, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn get_caps(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Write file capabilities with `root_uid` as the namespace root.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn set_caps(&self, path: &Path, caps: &[u8], root_uid: u32) -> io::Result<()>;

    /// Change ownership without following symlinks; `-1` keeps an id.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn chown(&self, path: &Path, uid: i64, gid: i64) -> io::Result<()>;

    /// Translate the ids of the POSIX ACLs on `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn shift_acl(&self, path: &Path, shift: AclShift<'_>) -> io::Result<()>;

    /// Whether files below `dir` accept namespaced (VFS v3) capabilities.
    fn supports_vfs3_fscaps(&self, dir: &Path) -> bool;
}

/// [`FsBackend`] acting on the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

// Missing attribute, or a filesystem without xattrs.
fn is_absent(err: Errno) -> bool {
    err == Errno::NODATA || err == Errno::NOTSUP
}

fn read_xattr(path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    let mut empty: [u8; 0] = [];
    let size = match rustix::fs::getxattr(path, name, &mut empty[..]) {
        Ok(size) => size,
        Err(err) if is_absent(err) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut buf = vec![0u8; size];
    let len = rustix::fs::getxattr(path, name, &mut buf[..])?;
    buf.truncate(len);
    Ok(Some(buf))
}

fn owner_id(id: i64) -> Option<u32> {
    u32::try_from(id).ok()
}

impl FsBackend for HostFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        Ok(FileStat::from(&fs::symlink_metadata(path)?))
    }

    fn get_caps(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        read_xattr(path, XATTR_CAPS)
    }

    fn set_caps(&self, path: &Path, caps: &[u8], root_uid: u32) -> io::Result<()> {
        let blob = FileCaps::decode(caps)?.with_root_id(root_uid).encode();
        rustix::fs::setxattr(path, XATTR_CAPS, &blob, XattrFlags::empty())?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: i64, gid: i64) -> io::Result<()> {
        std::os::unix::fs::lchown(path, owner_id(uid), owner_id(gid))
    }

    fn shift_acl(&self, path: &Path, shift: AclShift<'_>) -> io::Result<()> {
        let mut names = vec![XATTR_ACL_ACCESS];
        if self.stat(path)?.is_dir() {
            names.push(XATTR_ACL_DEFAULT);
        }

        for name in names {
            let Some(blob) = read_xattr(path, name)? else {
                continue;
            };
            if let Some(shifted) = shift_acl_xattr(&blob, shift)? {
                rustix::fs::setxattr(path, name, &shifted, XattrFlags::empty())?;
            }
        }

        Ok(())
    }

    fn supports_vfs3_fscaps(&self, dir: &Path) -> bool {
        let is_dir = fs::symlink_metadata(dir).is_ok_and(|md| md.is_dir());
        let dir = if is_dir {
            dir
        } else {
            dir.parent().unwrap_or_else(|| Path::new("/"))
        };

        let Ok(file) = tempfile::NamedTempFile::new_in(dir) else {
            return false;
        };

        // cap_net_raw+ep owned by a namespace root
        let caps = FileCaps {
            effective: true,
            permitted: [1 << 13, 0],
            inheritable: [0, 0],
            root_id: Some(1_000_000),
        };
        rustix::fs::setxattr(file.path(), XATTR_CAPS, &caps.encode(), XattrFlags::empty()).is_ok()
    }
}
