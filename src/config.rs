//! Filesystem configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Default creation mask applied to new inode permissions
pub const DEFAULT_UMASK: u32 = 0o022;

/// Default bound on symlink hops during `stat` resolution
pub const DEFAULT_SYMLINK_HOP_LIMIT: u32 = 40;

/// Per-filesystem configuration.
///
/// The umask lives here rather than in process-global state; two
/// filesystem instances can carry different masks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Mask cleared from permissions at inode creation
    pub umask: u32,

    /// Owner assigned to new inodes
    pub uid: u32,

    /// Group assigned to new inodes
    pub gid: u32,

    /// Conventional temporary directory inside the namespace
    pub tempdir: String,

    /// Maximum symlink hops before `stat` reports a loop
    pub symlink_hop_limit: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            umask: DEFAULT_UMASK,
            uid: 0,
            gid: 0,
            tempdir: "/tmp".to_string(),
            symlink_hop_limit: DEFAULT_SYMLINK_HOP_LIMIT,
        }
    }
}

impl FsConfig {
    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(umask) = std::env::var("SEALFS_UMASK") {
            if let Ok(mask) = u32::from_str_radix(umask.trim().trim_start_matches("0o"), 8) {
                self.umask = mask;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.umask > 0o777 {
            return Err(Error::new("config", "umask", ErrorKind::InvalidInput));
        }
        if self.symlink_hop_limit == 0 {
            return Err(Error::new(
                "config",
                "symlink_hop_limit",
                ErrorKind::InvalidInput,
            ));
        }
        Ok(())
    }
}
