use alloc::sync::Arc;

use super::inode::VfsInode;
use crate::{
    error::{FsError, FsResult},
    fat32::file_system::Fat32FS,
};

/* File System Type */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Fat32,
    /// reserved, mounting fails with `Unsupported`
    Ext4,
}

impl FsType {
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "vfat" => Some(Self::Fat32),
            "ext4" => Some(Self::Ext4),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Fat32 => "vfat",
            Self::Ext4 => "ext4",
        }
    }
}

/// A mounted volume
#[derive(Clone)]
pub enum FileSystem {
    Fat32(Arc<Fat32FS>),
}

impl FileSystem {
    pub fn mount(type_: FsType, dev: usize) -> FsResult<Self> {
        match type_ {
            FsType::Fat32 => Ok(Self::Fat32(Fat32FS::load(dev)?)),
            FsType::Ext4 => {
                warn!("vfs: ext4 requested on dev {}, not supported", dev);
                Err(FsError::Unsupported)
            }
        }
    }

    pub fn fs_type(&self) -> FsType {
        match self {
            Self::Fat32(_) => FsType::Fat32,
        }
    }

    pub fn dev(&self) -> usize {
        match self {
            Self::Fat32(fs) => fs.dev,
        }
    }

    pub fn root_inode(&self) -> FsResult<VfsInode> {
        match self {
            Self::Fat32(fs) => Ok(VfsInode::Fat32(fs.root_inode()?)),
        }
    }
}
