//! Block device and block cache module

pub mod block_cache;
pub mod block_dev;

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use spin::RwLock;

use crate::error::{FsError, FsResult};
use block_dev::BlockDevice;

pub use block_cache::{get_block_cache, BufferCache, BufferGuard, BLOCK_CACHE};

lazy_static! {
    /// Registered block devices, keyed by device id
    static ref BLOCK_DEVICES: RwLock<BTreeMap<usize, Arc<dyn BlockDevice>>> =
        RwLock::new(BTreeMap::new());
}

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(1);

/// Register a device driver and return the id the caches will know it by.
pub fn register_block_device(device: Arc<dyn BlockDevice>) -> usize {
    let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
    BLOCK_DEVICES.write().insert(id, device);
    debug!("block: registered device {}", id);
    id
}

/// Remove a device, dropping its unreferenced buffers from the global cache.
pub fn unregister_block_device(id: usize) -> Option<Arc<dyn BlockDevice>> {
    let device = BLOCK_DEVICES.write().remove(&id);
    if device.is_some() {
        BLOCK_CACHE.invalidate_device(id);
        debug!("block: unregistered device {}", id);
    }
    device
}

pub(crate) fn get_block_device(id: usize) -> FsResult<Arc<dyn BlockDevice>> {
    BLOCK_DEVICES.read().get(&id).cloned().ok_or(FsError::NoDevice)
}
