//! Backend-independent surface: filesystem tags, inodes, open files, paths
//!
//! Generic code holds a [`VfsInode`] and never names the backend; every
//! operation is forwarded by matching on the backend variant.

mod file;
mod flags;
mod fs;
mod inode;
pub mod path;

pub use file::File;
pub use flags::OpenFlags;
pub use fs::{FileSystem, FsType};
pub use inode::{Stat, StatMode, VfsInode, VfsInodeGuard};
