//! Inode metadata module
//!
//! The in-memory inode graph: typed nodes, their attributes, and the
//! arena-style table that owns every node and allocates inode numbers.

mod inode;

pub use inode::{
    FileType, Ino, InodeTable, Metadata, Node, PARENT_ENTRY, ROOT_INO, SELF_ENTRY,
};
