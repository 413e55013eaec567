//! End-to-end tests against in-memory and file-backed volumes

mod directory;
mod image;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, Thread};
use std::time::Duration;

use fat32_fs::{
    fat32::time::set_clock, register_block_device, set_scheduler, BlockDevice, Fat32FS,
    FormatOptions, FsError, FsResult, Scheduler, UserSpace, BLOCK_SZ,
};

use crate::{host_clock, logging};

/// A disk in memory that counts its transfers
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SZ]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(vec![[0u8; BLOCK_SZ]; blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// (reads, writes) so far
    pub fn io(&self) -> (usize, usize) {
        (
            self.reads.load(Ordering::SeqCst),
            self.writes.load(Ordering::SeqCst),
        )
    }

    /// raw block content, bypassing the cache
    pub fn block(&self, block_id: usize) -> [u8; BLOCK_SZ] {
        self.blocks.lock().unwrap()[block_id]
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&self.blocks.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blocks.lock().unwrap()[block_id].copy_from_slice(buf);
    }
}

static NEXT_TASK: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static TASK_ID: usize = NEXT_TASK.fetch_add(1, Ordering::Relaxed);
}

/// Suspends blocked test threads with park/unpark
#[derive(Default)]
pub struct ThreadScheduler {
    threads: Mutex<HashMap<usize, Thread>>,
}

impl Scheduler for ThreadScheduler {
    fn current_task(&self) -> usize {
        let id = TASK_ID.with(|id| *id);
        self.threads
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(thread::current);
        id
    }

    fn block_current(&self) {
        thread::park_timeout(Duration::from_millis(50));
    }

    fn wakeup(&self, task: usize) {
        if let Some(thread) = self.threads.lock().unwrap().get(&task) {
            thread.unpark();
        }
    }
}

/// An address space backed by a vector, mapped at `base`
pub struct VecSpace {
    base: usize,
    mem: Mutex<Vec<u8>>,
}

impl VecSpace {
    pub fn new(base: usize, len: usize) -> Self {
        Self {
            base,
            mem: Mutex::new(vec![0u8; len]),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    fn range(&self, addr: usize, len: usize) -> FsResult<std::ops::Range<usize>> {
        let size = self.mem.lock().unwrap().len();
        let start = addr.checked_sub(self.base).ok_or(FsError::BadAddress)?;
        if start + len > size {
            return Err(FsError::BadAddress);
        }
        Ok(start..start + len)
    }

    pub fn write(&self, addr: usize, data: &[u8]) {
        let range = self.range(addr, data.len()).unwrap();
        self.mem.lock().unwrap()[range].copy_from_slice(data);
    }

    pub fn read(&self, addr: usize, len: usize) -> Vec<u8> {
        let range = self.range(addr, len).unwrap();
        self.mem.lock().unwrap()[range].to_vec()
    }
}

impl UserSpace for VecSpace {
    fn copy_out(&self, dst: usize, src: &[u8]) -> FsResult<()> {
        let range = self.range(dst, src.len())?;
        self.mem.lock().unwrap()[range].copy_from_slice(src);
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], src: usize) -> FsResult<()> {
        let range = self.range(src, dst.len())?;
        dst.copy_from_slice(&self.mem.lock().unwrap()[range]);
        Ok(())
    }
}

static SETUP: Once = Once::new();

/// Install logger, scheduler and clock once per test process.
pub fn setup() {
    SETUP.call_once(|| {
        logging::init();
        set_scheduler(Arc::new(ThreadScheduler::default()));
        set_clock(host_clock);
    });
}

/// A freshly formatted volume in memory
pub struct Volume {
    pub disk: Arc<RamDisk>,
    pub dev: usize,
    pub fs: Arc<Fat32FS>,
}

impl Volume {
    pub fn with_options(opts: FormatOptions) -> Self {
        setup();
        let disk = RamDisk::new(opts.total_sectors as usize);
        let dev = register_block_device(disk.clone());
        Fat32FS::format(dev, &opts).unwrap();
        let fs = Fat32FS::load(dev).unwrap();
        Self { disk, dev, fs }
    }

    /// `total_sectors` sectors, `sectors_per_cluster` per cluster, the rest default
    pub fn new(total_sectors: u32, sectors_per_cluster: u8) -> Self {
        let mut opts = FormatOptions::new(total_sectors);
        opts.sectors_per_cluster = sectors_per_cluster;
        Self::with_options(opts)
    }

    /// Mount the same device again, with a cold inode cache.
    pub fn remount(&self) -> Arc<Fat32FS> {
        Fat32FS::load(self.dev).unwrap()
    }
}

/// random ASCII digits
pub fn random_digits(len: usize) -> Vec<u8> {
    (0..len).map(|_| b'0' + rand::random::<u8>() % 10).collect()
}
