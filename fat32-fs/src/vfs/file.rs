use alloc::{sync::Arc, vec::Vec};

use super::inode::{Stat, VfsInode};
use crate::{
    config::BLOCK_SZ,
    error::{FsError, FsResult},
    mm::UserSpace,
    sync::SleepLock,
};

/// An open file: an inode handle plus the access mode and shared offset
pub struct File {
    readable: bool,
    writable: bool,
    inner: SleepLock<FileInner>,
}

struct FileInner {
    offset: usize,
    inode: VfsInode,
}

impl File {
    pub fn new(inode: VfsInode, readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            readable,
            writable,
            inner: SleepLock::new(FileInner { offset: 0, inode }),
        })
    }

    /// the file readable?
    pub fn readable(&self) -> bool {
        self.readable
    }

    /// the file writable?
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Another descriptor on the same open file, sharing its offset.
    pub fn dup(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    pub fn offset(&self) -> usize {
        self.inner.lock().offset
    }

    pub fn seek(&self, offset: usize) {
        self.inner.lock().offset = offset;
    }

    /// A new handle on the underlying inode.
    pub fn inode(&self) -> FsResult<VfsInode> {
        self.inner.lock().inode.dup()
    }

    /// Read up to `len` bytes at the current offset into address `dst` of
    /// `space`, returning the number of bytes read.
    pub fn read(&self, space: &dyn UserSpace, dst: usize, len: usize) -> FsResult<usize> {
        if !self.readable {
            return Err(FsError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        let guard = inner.inode.lock()?;
        let mut bounce = [0u8; BLOCK_SZ];
        let mut done = 0;
        while done < len {
            let chunk = core::cmp::min(BLOCK_SZ, len - done);
            let read = guard.read_at(inner.offset + done, &mut bounce[..chunk])?;
            if read == 0 {
                break;
            }
            space.copy_out(dst + done, &bounce[..read])?;
            done += read;
        }
        drop(guard);
        inner.offset += done;
        Ok(done)
    }

    /// Write `len` bytes from address `src` of `space` at the current offset.
    pub fn write(&self, space: &dyn UserSpace, src: usize, len: usize) -> FsResult<usize> {
        if !self.writable {
            return Err(FsError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        let mut guard = inner.inode.lock()?;
        let mut bounce = [0u8; BLOCK_SZ];
        let mut done = 0;
        while done < len {
            let chunk = core::cmp::min(BLOCK_SZ, len - done);
            space.copy_in(&mut bounce[..chunk], src + done)?;
            done += guard.write_at(inner.offset + done, &bounce[..chunk])?;
        }
        drop(guard);
        inner.offset += done;
        Ok(done)
    }

    /// get file status
    pub fn stat(&self) -> FsResult<Stat> {
        let inner = self.inner.lock();
        let guard = inner.inode.lock()?;
        Ok(guard.stat())
    }

    /// read all data from the start, leaving the offset alone
    pub fn read_all(&self) -> FsResult<Vec<u8>> {
        let inner = self.inner.lock();
        let guard = inner.inode.lock()?;
        let mut buffer = [0u8; BLOCK_SZ];
        let mut v: Vec<u8> = Vec::new();
        loop {
            let len = guard.read_at(v.len(), &mut buffer)?;
            if len == 0 {
                break;
            }
            v.extend_from_slice(&buffer[..len]);
        }
        Ok(v)
    }
}
