//! Filesystem façade and open-file handles
//!
//! Ties the inode tree, the sealed payload store, and the symlink
//! table together behind [`SecureFs`].

mod filesystem;
mod flags;
mod handle;
mod info;
mod store;

pub use filesystem::SecureFs;
pub use flags::{Access, OpenFlags};
pub use handle::File;
pub use info::{same_file, FileId, FileInfo, MODE_DIR, MODE_REGULAR, MODE_SYMLINK};
pub use store::{PayloadStore, SealedFile};
