//! Constants of the storage layer

/// size of a disk block (and of a FAT32 sector) in bytes
pub const BLOCK_SZ: usize = 512;
/// number of buffers in the global buffer cache
pub const BLOCK_CACHE_SIZE: usize = 64;
/// number of in-memory inodes per mounted volume
pub const INODE_CACHE_SIZE: usize = 64;
/// size of one directory entry record
pub const DIRENT_SZ: usize = 32;
/// directory entry records per block
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SZ / DIRENT_SZ;
/// longest long file name, in UTF-16 units
pub const MAX_NAME_LEN: usize = 255;
/// longest path accepted by the path walker
pub const MAX_PATH_LEN: usize = 4096;
