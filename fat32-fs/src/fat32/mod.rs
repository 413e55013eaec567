//! FAT32 backend

pub mod dentry;
pub mod fat;
pub mod file_system;
pub mod inode;
pub mod super_block;
pub mod time;
