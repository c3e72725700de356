//! Common error types for the idshift subsystem.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`IdmapError`].
pub type IdmapResult<T> = Result<T, IdmapError>;

/// Errors raised while discovering, merging, validating or applying ID maps.
#[derive(Error, Diagnostic, Debug)]
pub enum IdmapError {
    /// An idmap entry could not be parsed or would wrap around.
    #[error("Bad idmap {input:?}: {reason}")]
    #[diagnostic(
        code(idshift::idmap::malformed),
        help("Entries look like 'u:0:100000:65536' (class u, g or b, then nsid, hostid, range)")
    )]
    MalformedEntry {
        /// The offending input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A strict append overlapped an existing entry.
    #[error("Conflicting id mapping: {entry}")]
    #[diagnostic(code(idshift::idmap::conflict))]
    RangeConflict {
        /// The rejected entry, in LXC notation.
        entry: String,
    },

    /// A safe merge would map one host id from two namespace ids.
    #[error("Host id is in the range of subids")]
    #[diagnostic(
        code(idshift::idmap::host_id_conflict),
        help("Each host id may only back a single namespace id")
    )]
    HostIdConflict,

    /// The shadow file has no entry for the user.
    #[error("No map found for user {user:?} in {}", path.display())]
    #[diagnostic(
        code(idshift::shadow::no_user_map),
        help("Add a range for the user to /etc/subuid and /etc/subgid (see usermod --add-subuids)")
    )]
    NoUserMap {
        /// The user that was looked up.
        user: String,
        /// The shadow file that was searched.
        path: PathBuf,
    },

    /// A kernel or shadow map source could not be read or had bad content.
    #[error("Unable to read {}: {source}", path.display())]
    #[diagnostic(code(idshift::source::unreadable))]
    UnreadableSource {
        /// The source file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The kernel map file held no usable line.
    #[error("Namespace doesn't have any map set ({})", path.display())]
    #[diagnostic(code(idshift::source::empty_kernel_map))]
    EmptyKernelMap {
        /// The kernel map file.
        path: PathBuf,
    },

    /// An entry's host range is not granted by the running kernel.
    #[error("The '{entry}' map can't work in the current user namespace")]
    #[diagnostic(
        code(idshift::idmap::unusable),
        help("This is typical when running nested inside another user namespace")
    )]
    Unusable {
        /// The entry, in LXC notation.
        entry: String,
    },

    /// A filesystem operation failed while shifting a tree.
    #[error("Failed to {operation} {}: {source}", path.display())]
    #[diagnostic(code(idshift::shift::failed))]
    ShiftFailure {
        /// What was being done.
        operation: &'static str,
        /// The path being shifted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The shift target does not exist.
    #[error("No such file or directory: {}", path.display())]
    #[diagnostic(code(idshift::shift::not_found))]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(idshift::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(idshift::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl IdmapError {
    /// Shorthand for a [`IdmapError::MalformedEntry`].
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEntry {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`IdmapError::UnreadableSource`].
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            source,
        }
    }

    /// Whether this is the "no map for user" condition.
    #[must_use]
    pub const fn is_no_user_map(&self) -> bool {
        matches!(self, Self::NoUserMap { .. })
    }
}

impl From<serde_json::Error> for IdmapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
