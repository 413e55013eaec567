use alloc::{string::String, vec::Vec};

use super::fs::FsType;
use crate::{
    config::BLOCK_SZ,
    error::FsResult,
    fat32::inode::{Dirent, Inode, InodeGuard, InodeType},
};

/// An inode of any mounted backend
#[derive(Debug)]
pub enum VfsInode {
    Fat32(Inode),
}

impl VfsInode {
    pub fn fs_type(&self) -> FsType {
        match self {
            Self::Fat32(_) => FsType::Fat32,
        }
    }

    pub fn lock(&self) -> FsResult<VfsInodeGuard<'_>> {
        match self {
            Self::Fat32(inode) => Ok(VfsInodeGuard::Fat32(inode.lock()?)),
        }
    }

    pub fn dup(&self) -> FsResult<VfsInode> {
        match self {
            Self::Fat32(inode) => Ok(Self::Fat32(inode.dup()?)),
        }
    }

    pub fn put(self) -> FsResult<()> {
        match self {
            Self::Fat32(inode) => inode.put(),
        }
    }
}

/// A locked [`VfsInode`]
pub enum VfsInodeGuard<'a> {
    Fat32(InodeGuard<'a>),
}

impl VfsInodeGuard<'_> {
    pub fn unlock(self) {}

    pub fn type_(&self) -> InodeType {
        match self {
            Self::Fat32(guard) => guard.type_(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.type_() == InodeType::Dir
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Fat32(guard) => guard.size() as usize,
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            Self::Fat32(guard) => guard
                .attributes()
                .contains(crate::fat32::dentry::FileAttributes::READ_ONLY),
        }
    }

    pub fn update(&self) -> FsResult<()> {
        match self {
            Self::Fat32(guard) => guard.update(),
        }
    }

    pub fn truncate(&mut self) -> FsResult<()> {
        match self {
            Self::Fat32(guard) => guard.truncate(),
        }
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        match self {
            Self::Fat32(guard) => guard.read_at(offset, buf),
        }
    }

    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        match self {
            Self::Fat32(guard) => guard.write_at(offset, buf),
        }
    }

    pub fn dirlookup(&self, name: &str) -> FsResult<Option<VfsInode>> {
        match self {
            Self::Fat32(guard) => Ok(guard.dirlookup(name)?.map(VfsInode::Fat32)),
        }
    }

    pub fn create(&mut self, name: &str, type_: InodeType) -> FsResult<VfsInode> {
        match self {
            Self::Fat32(guard) => Ok(VfsInode::Fat32(guard.create(name, type_)?)),
        }
    }

    pub fn delete(&mut self, child: &VfsInode) -> FsResult<()> {
        match (self, child) {
            (Self::Fat32(guard), VfsInode::Fat32(child)) => guard.delete(child),
        }
    }

    pub fn is_empty(&self) -> FsResult<bool> {
        match self {
            Self::Fat32(guard) => guard.is_empty(),
        }
    }

    pub fn list_entries(&self) -> FsResult<Vec<Dirent>> {
        match self {
            Self::Fat32(guard) => guard.list_entries(),
        }
    }

    pub fn ls(&self) -> FsResult<Vec<String>> {
        match self {
            Self::Fat32(guard) => guard.ls(),
        }
    }

    pub fn stat(&self) -> Stat {
        match self {
            Self::Fat32(guard) => guard.stat(),
        }
    }
}

/* Inode Stat */

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// ID of device containing file
    pub st_dev: u64,
    /// Inode number
    pub st_ino: u64,
    /// File type and mode
    pub st_mode: u32,
    /// Number of hard links
    pub st_nlink: u32,
    /// Size of file, in bytes.
    pub st_size: i64,
    /// Optimal block size for I/O.
    pub st_blksize: u32,
    /// Number 512-byte blocks allocated.
    pub st_blocks: u64,
    /// Time of last modification.
    pub st_mtime: i64,
    /// Time of creation.
    pub st_ctime: i64,
}

impl Stat {
    /// create a new stat
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        st_dev: u64,
        st_ino: u64,
        st_mode: u32,
        st_nlink: u32,
        st_size: i64,
        st_blocks: u64,
        st_mtime: i64,
        st_ctime: i64,
    ) -> Self {
        Self {
            st_dev,
            st_ino,
            st_mode,
            st_nlink,
            st_size,
            st_blksize: BLOCK_SZ as u32,
            st_blocks,
            st_mtime,
            st_ctime,
        }
    }

    /// check whether the inode is a directory
    pub fn is_dir(&self) -> bool {
        StatMode::from_bits_truncate(self.st_mode).contains(StatMode::DIR)
    }

    /// check whether the inode is a file
    pub fn is_file(&self) -> bool {
        StatMode::from_bits_truncate(self.st_mode).contains(StatMode::FILE)
    }
}

bitflags! {
    /// The mode of a inode
    /// whether a directory or a file
    pub struct StatMode: u32 {
        /// null
        const NULL  = 0;
        /// directory
        const DIR   = 0o040000;
        /// ordinary regular file
        const FILE  = 0o100000;
    }
}
