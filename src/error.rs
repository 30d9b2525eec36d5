//! Error types for sealfs
//!
//! Every failure is an ordinary return value carrying the operation
//! that failed, the offending path, and a machine-checkable kind.

use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate. Internal layers substitute
/// a bare [`ErrorKind`] until path context is attached.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of a filesystem failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Path does not resolve to an entry
    #[error("no such file or directory")]
    NotFound,
    /// Entry already exists
    #[error("file already exists")]
    AlreadyExists,
    /// A non-directory appeared where a directory was required
    #[error("not a directory")]
    NotADirectory,
    /// A directory appeared where one is not allowed
    #[error("is a directory")]
    IsADirectory,
    /// Directory holds more than its structural entries
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// Requested access denied by permission bits
    #[error("permission denied")]
    PermissionDenied,
    /// Malformed argument (renaming root, bad access mode, ...)
    #[error("invalid argument")]
    InvalidInput,
    /// Symlink resolution exceeded the hop limit
    #[error("too many levels of symbolic links")]
    FilesystemLoop,
    /// readlink on something that is not a symlink
    #[error("not a symbolic link")]
    NotASymlink,
    /// Ciphertext failed authentication
    #[error("payload authentication failed")]
    CorruptedPayload,
    /// RNG or key-sealing failure
    #[error("internal error")]
    Internal,
}

/// A structured filesystem error: operation, path context, and kind.
///
/// Rename-style operations carry both paths.
#[derive(Debug, Clone)]
pub struct Error {
    op: &'static str,
    path: String,
    path2: Option<String>,
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(op: &'static str, path: impl Into<String>, kind: ErrorKind) -> Self {
        Error {
            op,
            path: path.into(),
            path2: None,
            kind,
        }
    }

    pub(crate) fn link(
        op: &'static str,
        old: impl Into<String>,
        new: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        Error {
            op,
            path: old.into(),
            path2: Some(new.into()),
            kind,
        }
    }

    /// The operation that failed ("open", "mkdir", ...)
    pub fn op(&self) -> &str {
        self.op
    }

    /// The path the operation was invoked on
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The destination path, for two-path operations like rename
    pub fn path2(&self) -> Option<&str> {
        self.path2.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == ErrorKind::PermissionDenied
    }

    /// Rewrap a resolution error under a different operation tag,
    /// keeping the kind and path context.
    pub(crate) fn with_op(mut self, op: &'static str) -> Self {
        self.op = op;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path2 {
            Some(p2) => write!(f, "{} {} {}: {}", self.op, self.path, p2, self.kind),
            None => write!(f, "{} {}: {}", self.op, self.path, self.kind),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_single_path() {
        let err = Error::new("open", "/a/b", ErrorKind::NotFound);
        assert_eq!(err.to_string(), "open /a/b: no such file or directory");
    }

    #[test]
    fn test_display_two_paths() {
        let err = Error::link("rename", "/a", "/b", ErrorKind::AlreadyExists);
        assert_eq!(err.to_string(), "rename /a /b: file already exists");
    }

    #[test]
    fn test_kind_predicates() {
        assert!(Error::new("stat", "/x", ErrorKind::NotFound).is_not_found());
        assert!(Error::new("mkdir", "/x", ErrorKind::AlreadyExists).is_already_exists());
        assert!(Error::new("open", "/x", ErrorKind::PermissionDenied).is_permission_denied());
        assert!(!Error::new("open", "/x", ErrorKind::IsADirectory).is_not_found());
    }
}
