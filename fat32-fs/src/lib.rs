//! fat32-fs
//!
//! fat32-fs is the storage layer of the kernel: a fixed-size block cache
//! layered under a FAT32 filesystem, exposed to the rest of the kernel through
//! an inode abstraction.
//!
//! The crate is divided into levels, from bottom to top:
//!
//! - [`block`]: block device interface and the buffer cache
//! - [`fat32::super_block`]: volume geometry parsed from the boot sector and FSInfo
//! - [`fat32::fat`]: cluster-chain allocator over the File Allocation Table
//! - [`fat32::dentry`]: encode/decode of short and long (VFAT) directory entries
//! - [`fat32::inode`]: the inode cache, file content and directory operations
//! - [`vfs`]: backend dispatch, open files and path walking
//!
//! The scheduler, the physical device driver and the user/kernel copy
//! routines are provided by the embedding kernel through [`sync::Scheduler`],
//! [`BlockDevice`] and [`mm::UserSpace`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod block;
pub mod config;
pub mod error;
pub mod fat32;
pub mod mm;
pub mod sync;
pub mod vfs;

pub use block::{block_dev::BlockDevice, register_block_device, unregister_block_device};
pub use config::BLOCK_SZ;
pub use error::{FsError, FsResult};
pub use fat32::{
    file_system::{Fat32FS, FormatOptions},
    inode::{Dirent, Inode, InodeGuard, InodeKey, InodeType},
};
pub use mm::UserSpace;
pub use sync::{set_scheduler, Scheduler};
pub use vfs::{File, FileSystem, FsType, OpenFlags, Stat, VfsInode};
