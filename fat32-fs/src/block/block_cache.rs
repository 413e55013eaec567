//! Buffer cache
//!
//! A fixed pool of block-sized buffers looked up by `(device, block)`. Each
//! buffer's content sits behind its own [`SleepLock`]; the binding table and
//! the recency list sit behind one short-held spin lock. A buffer is rebound
//! only when nobody references it, so a block with a positive reference count
//! is never evicted.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use lazy_static::lazy_static;
use spin::Mutex;

use super::{block_dev::BlockDevice, get_block_device};
use crate::{
    config::{BLOCK_CACHE_SIZE, BLOCK_SZ},
    error::{FsError, FsResult},
    sync::{SleepLock, SleepLockGuard},
};

#[repr(C, align(8))]
struct BlockData([u8; BLOCK_SZ]);

/// Content of one buffer, only touched with its sleep lock held
struct BufferContent {
    data: BlockData,
    /// `(device, block)` whose bytes `data` holds
    loaded: Option<(usize, usize)>,
    /// `data` reflects the last written state of `loaded`
    valid: bool,
    /// `data` differs from disk
    dirty: bool,
}

#[derive(Clone, Copy)]
struct BufferMeta {
    key: Option<(usize, usize)>,
    ref_cnt: usize,
}

struct CacheIndex {
    meta: Vec<BufferMeta>,
    /// buffer indices, least recently used at the front
    lru: VecDeque<usize>,
}

impl CacheIndex {
    fn find(&self, key: (usize, usize)) -> Option<usize> {
        self.meta.iter().position(|meta| meta.key == Some(key))
    }

    fn touch(&mut self, index: usize) {
        if let Some(pos) = self.lru.iter().position(|&i| i == index) {
            self.lru.remove(pos);
        }
        self.lru.push_back(index);
    }
}

/// Fixed pool of block buffers with LRU recycling
pub struct BufferCache {
    buffers: Vec<SleepLock<BufferContent>>,
    index: Mutex<CacheIndex>,
}

impl BufferCache {
    /// Allocate a pool of `capacity` buffers, all unbound.
    pub fn new(capacity: usize) -> Self {
        let buffers = (0..capacity)
            .map(|_| {
                SleepLock::new(BufferContent {
                    data: BlockData([0; BLOCK_SZ]),
                    loaded: None,
                    valid: false,
                    dirty: false,
                })
            })
            .collect();
        Self {
            buffers,
            index: Mutex::new(CacheIndex {
                meta: alloc::vec![BufferMeta { key: None, ref_cnt: 0 }; capacity],
                lru: (0..capacity).collect(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Get an exclusively locked buffer holding `block` of `device`.
    ///
    /// The device is read only if the buffer does not already hold the
    /// block. Suspends while another holder has the buffer locked. Fails with
    /// [`FsError::NoBuffer`] when every buffer is referenced.
    pub fn acquire(&self, device: usize, block: usize) -> FsResult<BufferGuard<'_>> {
        let driver = get_block_device(device)?;
        let key = (device, block);
        let index = {
            let mut inner = self.index.lock();
            match inner.find(key) {
                Some(i) => {
                    inner.meta[i].ref_cnt += 1;
                    i
                }
                None => {
                    let victim = inner
                        .lru
                        .iter()
                        .copied()
                        .find(|&i| inner.meta[i].ref_cnt == 0)
                        .ok_or(FsError::NoBuffer)?;
                    trace!(
                        "bcache: bind buffer {} to dev {} block {}",
                        victim,
                        device,
                        block
                    );
                    inner.meta[victim] = BufferMeta {
                        key: Some(key),
                        ref_cnt: 1,
                    };
                    victim
                }
            }
        };
        let mut content = self.buffers[index].lock();
        if !content.valid || content.loaded != Some(key) {
            driver.read_block(block, &mut content.data.0);
            content.loaded = Some(key);
            content.valid = true;
            content.dirty = false;
        }
        Ok(BufferGuard {
            cache: self,
            index,
            device: driver,
            key,
            content,
        })
    }

    /// Number of holders of the buffer bound to `(device, block)`.
    pub fn ref_count(&self, device: usize, block: usize) -> usize {
        let inner = self.index.lock();
        inner
            .find((device, block))
            .map_or(0, |i| inner.meta[i].ref_cnt)
    }

    /// Whether some buffer is bound to `(device, block)`.
    pub fn is_cached(&self, device: usize, block: usize) -> bool {
        self.index.lock().find((device, block)).is_some()
    }

    /// Unbind every unreferenced buffer of `device`.
    pub fn invalidate_device(&self, device: usize) {
        let mut inner = self.index.lock();
        for i in 0..inner.meta.len() {
            let meta = inner.meta[i];
            if meta.ref_cnt == 0 && matches!(meta.key, Some((dev, _)) if dev == device) {
                inner.meta[i].key = None;
                if let Some(pos) = inner.lru.iter().position(|&j| j == i) {
                    inner.lru.remove(pos);
                }
                inner.lru.push_front(i);
            }
        }
    }

    fn unpin(&self, index: usize) {
        let mut inner = self.index.lock();
        let meta = &mut inner.meta[index];
        assert!(meta.ref_cnt > 0, "releasing an unreferenced buffer");
        meta.ref_cnt -= 1;
        if meta.ref_cnt == 0 {
            inner.touch(index);
        }
    }
}

/// A locked, referenced buffer; released on drop
pub struct BufferGuard<'a> {
    cache: &'a BufferCache,
    index: usize,
    device: Arc<dyn BlockDevice>,
    key: (usize, usize),
    content: SleepLockGuard<'a, BufferContent>,
}

impl BufferGuard<'_> {
    pub fn device_id(&self) -> usize {
        self.key.0
    }

    pub fn block_id(&self) -> usize {
        self.key.1
    }

    /// Record that the buffer differs from disk; written back on release.
    pub fn mark_dirty(&mut self) {
        self.content.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.content.dirty
    }

    pub fn data(&self) -> &[u8; BLOCK_SZ] {
        &self.content.data.0
    }

    /// Mutable bytes of the block; marks the buffer dirty.
    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SZ] {
        self.mark_dirty();
        &mut self.content.data.0
    }

    /// Get a immutable reference of type T from the buffer by an offset
    pub fn get_ref<T: Copy>(&self, offset: usize) -> &T {
        let type_size = core::mem::size_of::<T>();
        assert!(offset + type_size <= BLOCK_SZ);
        assert_eq!(offset % core::mem::align_of::<T>(), 0);
        let addr = self.data().as_ptr() as usize + offset;
        unsafe { &*(addr as *const T) }
    }

    /// Get mutable reference of type T from the buffer by an offset
    pub fn get_mut<T: Copy>(&mut self, offset: usize) -> &mut T {
        let type_size = core::mem::size_of::<T>();
        assert!(offset + type_size <= BLOCK_SZ);
        assert_eq!(offset % core::mem::align_of::<T>(), 0);
        let addr = self.data_mut().as_mut_ptr() as usize + offset;
        unsafe { &mut *(addr as *mut T) }
    }

    /// read the buffer by closure f
    pub fn read<T: Copy, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get_ref(offset))
    }

    /// modify the buffer by closure f
    pub fn modify<T: Copy, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    /// Write back if dirty, unlock and drop the reference.
    pub fn release(self) {}
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        if self.content.dirty {
            trace!("bcache: write back dev {} block {}", self.key.0, self.key.1);
            self.device.write_block(self.key.1, &self.content.data.0);
            self.content.dirty = false;
        }
        // the content lock is released after this, a rebinding holder waits on it
        self.cache.unpin(self.index);
    }
}

lazy_static! {
    /// The global buffer cache shared by every mounted volume
    pub static ref BLOCK_CACHE: BufferCache = BufferCache::new(BLOCK_CACHE_SIZE);
}

/// Get the locked buffer of `block` on `device` from the global cache.
pub fn get_block_cache(device: usize, block: usize) -> FsResult<BufferGuard<'static>> {
    BLOCK_CACHE.acquire(device, block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{register_block_device, unregister_block_device};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct CountingDisk {
        blocks: StdMutex<Vec<[u8; BLOCK_SZ]>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CountingDisk {
        fn new(n: usize) -> Arc<Self> {
            Arc::new(Self {
                blocks: StdMutex::new(vec![[0u8; BLOCK_SZ]; n]),
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            })
        }
    }

    impl BlockDevice for CountingDisk {
        fn read_block(&self, block_id: usize, buf: &mut [u8]) {
            self.reads.fetch_add(1, Ordering::SeqCst);
            buf.copy_from_slice(&self.blocks.lock().unwrap()[block_id]);
        }

        fn write_block(&self, block_id: usize, buf: &[u8]) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.blocks.lock().unwrap()[block_id].copy_from_slice(buf);
        }
    }

    #[test]
    fn hit_does_not_reread() {
        let disk = CountingDisk::new(8);
        let dev = register_block_device(disk.clone());
        let cache = BufferCache::new(4);
        cache.acquire(dev, 3).unwrap().release();
        cache.acquire(dev, 3).unwrap().release();
        assert_eq!(disk.reads.load(Ordering::SeqCst), 1);
        assert_eq!(disk.writes.load(Ordering::SeqCst), 0);
        unregister_block_device(dev);
    }

    #[test]
    fn dirty_buffer_written_on_release() {
        let disk = CountingDisk::new(8);
        let dev = register_block_device(disk.clone());
        let cache = BufferCache::new(4);
        let mut buf = cache.acquire(dev, 5).unwrap();
        buf.modify(4, |word: &mut [u8; 4]| *word = 0xdead_beefu32.to_le_bytes());
        assert!(buf.is_dirty());
        assert_eq!(disk.writes.load(Ordering::SeqCst), 0);
        buf.release();
        assert_eq!(disk.writes.load(Ordering::SeqCst), 1);
        assert_eq!(&disk.blocks.lock().unwrap()[5][4..8], &[0xef, 0xbe, 0xad, 0xde]);
        unregister_block_device(dev);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let disk = CountingDisk::new(8);
        let dev = register_block_device(disk);
        let cache = BufferCache::new(2);
        let a = cache.acquire(dev, 0).unwrap();
        let b = cache.acquire(dev, 1).unwrap();
        assert_eq!(cache.acquire(dev, 2).err(), Some(FsError::NoBuffer));
        drop(a);
        let c = cache.acquire(dev, 2).unwrap();
        assert!(!cache.is_cached(dev, 0));
        assert_eq!(cache.ref_count(dev, 1), 1);
        drop((b, c));
        unregister_block_device(dev);
    }

    #[test]
    fn eviction_prefers_least_recently_used() {
        let disk = CountingDisk::new(8);
        let dev = register_block_device(disk);
        let cache = BufferCache::new(2);
        cache.acquire(dev, 0).unwrap().release();
        cache.acquire(dev, 1).unwrap().release();
        cache.acquire(dev, 0).unwrap().release();
        cache.acquire(dev, 2).unwrap().release();
        assert!(cache.is_cached(dev, 0));
        assert!(!cache.is_cached(dev, 1));
        unregister_block_device(dev);
    }

    #[test]
    fn unknown_device() {
        let cache = BufferCache::new(1);
        assert_eq!(cache.acquire(usize::MAX, 0).err(), Some(FsError::NoDevice));
        assert_eq!(cache.ref_count(usize::MAX, 0), 0);
    }
}
