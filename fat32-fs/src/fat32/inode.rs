//! In-memory inodes of a FAT32 volume
//!
//! An inode is the cached projection of one short directory record, keyed by
//! the sector and slot of that record. The cache is a fixed arena of slots;
//! an [`Inode`] is a counted handle naming a slot by index and generation, so
//! a handle can never reach a slot that was recycled under it.
//!
//! Slot states move `Free -> Loading -> Valid -> PendingDelete -> Free`. The
//! last handle dropped on a pending-delete inode releases its cluster chain
//! and clears its on-disk attribute byte, exactly once.

use core::{cmp::min, ops::ControlFlow};

use alloc::{string::String, sync::Arc, vec::Vec};
use spin::Mutex;

use super::{
    dentry::{
        encode_name, generate_short_name, name_eq, records_needed, validate_name, DirSlot,
        FileAttributes, ShortDirEntry, DELETED_MARK,
    },
    fat::FIRST_DATA_CLUSTER,
    file_system::Fat32FS,
    time::FatTimestamp,
};
use crate::{
    block::get_block_cache,
    config::{BLOCK_SZ, DIRENTS_PER_BLOCK, DIRENT_SZ},
    error::{FsError, FsResult},
    sync::{SleepLock, SleepLockGuard},
    vfs::{Stat, StatMode},
};

/// Location of the short record backing an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeKey {
    pub sector: u32,
    pub slot: u16,
}

impl InodeKey {
    /// the volume root, which has no backing short record
    pub const ROOT: Self = Self { sector: 0, slot: 0 };

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// inode number reported by stat
    pub fn ino(&self) -> u64 {
        if self.is_root() {
            1
        } else {
            self.sector as u64 * DIRENTS_PER_BLOCK as u64 + self.slot as u64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,
    Dir,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// bound to a key, content not read yet
    Loading,
    Valid,
    /// unlinked, reclaimed by the last put
    PendingDelete,
}

struct SlotMeta {
    key: Option<InodeKey>,
    ref_cnt: usize,
    generation: u64,
    state: SlotState,
    name: String,
    /// not an ownership edge
    parent: Option<InodeKey>,
}

pub(crate) struct InodeData {
    /// generation this content was hydrated for
    generation: u64,
    valid: bool,
    type_: InodeType,
    entry: ShortDirEntry,
    cluster_end: u32,
    cluster_count: u32,
}

impl InodeData {
    fn empty() -> Self {
        Self {
            generation: 0,
            valid: false,
            type_: InodeType::File,
            entry: ShortDirEntry::new([b' '; 11], FileAttributes::empty(), 0, FatTimestamp::default()),
            cluster_end: 0,
            cluster_count: 0,
        }
    }
}

pub(crate) struct InodeCache {
    slots: Vec<SleepLock<InodeData>>,
    /// slot bookkeeping, held only while searching or counting
    meta: Mutex<Vec<SlotMeta>>,
}

impl InodeCache {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| SleepLock::new(InodeData::empty())).collect();
        let meta = (0..capacity)
            .map(|_| SlotMeta {
                key: None,
                ref_cnt: 0,
                generation: 0,
                state: SlotState::Free,
                name: String::new(),
                parent: None,
            })
            .collect();
        Self {
            slots,
            meta: Mutex::new(meta),
        }
    }

    /// Take a reference on the slot bound to `key`, binding a fresh slot on a miss.
    pub fn get(&self, key: InodeKey, name: &str, parent: Option<InodeKey>) -> FsResult<(usize, u64)> {
        let mut meta = self.meta.lock();
        let hit = meta.iter().position(|m| {
            m.key == Some(key) && matches!(m.state, SlotState::Loading | SlotState::Valid)
        });
        if let Some(index) = hit {
            let m = &mut meta[index];
            m.ref_cnt += 1;
            if !name.is_empty() && m.name != name {
                m.name = String::from(name);
            }
            if parent.is_some() {
                m.parent = parent;
            }
            return Ok((index, m.generation));
        }
        let index = victim(&meta)?;
        let m = &mut meta[index];
        m.generation += 1;
        m.key = Some(key);
        m.ref_cnt = 1;
        m.state = SlotState::Loading;
        m.name = String::from(name);
        m.parent = parent;
        trace!("fat32: inode slot {} bound to {:?}", index, key);
        Ok((index, m.generation))
    }

    /// Take an unbound slot for an inode whose directory record does not
    /// exist yet. The slot holds one reference and is invisible to lookups
    /// until [`InodeCache::bind`].
    pub fn reserve(&self) -> FsResult<(usize, u64)> {
        let mut meta = self.meta.lock();
        let index = victim(&meta)?;
        let m = &mut meta[index];
        m.generation += 1;
        m.key = None;
        m.ref_cnt = 1;
        m.state = SlotState::Loading;
        m.name.clear();
        m.parent = None;
        Ok((index, m.generation))
    }

    /// Bind a reserved slot to the record at `key`.
    pub fn bind(
        &self,
        index: usize,
        generation: u64,
        key: InodeKey,
        name: &str,
        parent: Option<InodeKey>,
    ) -> FsResult<()> {
        let mut meta = self.meta.lock();
        if meta[index].generation != generation || meta[index].ref_cnt == 0 {
            return Err(FsError::StaleHandle);
        }
        // an unreferenced slot still caching a record that used to live here
        for (i, m) in meta.iter_mut().enumerate() {
            if i != index
                && m.key == Some(key)
                && m.ref_cnt == 0
                && matches!(m.state, SlotState::Loading | SlotState::Valid)
            {
                m.key = None;
                m.state = SlotState::Free;
                m.name.clear();
                m.parent = None;
            }
        }
        let m = &mut meta[index];
        m.key = Some(key);
        m.name = String::from(name);
        m.parent = parent;
        trace!("fat32: inode slot {} bound to {:?}", index, key);
        Ok(())
    }

    fn with_slot<V>(&self, index: usize, generation: u64, f: impl FnOnce(&mut SlotMeta) -> V) -> FsResult<V> {
        let mut meta = self.meta.lock();
        let m = &mut meta[index];
        if m.generation != generation || m.ref_cnt == 0 {
            return Err(FsError::StaleHandle);
        }
        Ok(f(m))
    }

    fn dup(&self, index: usize, generation: u64) -> FsResult<()> {
        self.with_slot(index, generation, |m| m.ref_cnt += 1)
    }

    fn mark_valid(&self, index: usize, generation: u64) -> FsResult<()> {
        self.with_slot(index, generation, |m| {
            if m.state == SlotState::Loading {
                m.state = SlotState::Valid;
            }
        })
    }

    fn mark_deleted(&self, index: usize, generation: u64) -> FsResult<()> {
        self.with_slot(index, generation, |m| m.state = SlotState::PendingDelete)
    }

    /// Drop one reference. Returns true when the caller holds the last
    /// reference to an unlinked inode and must reclaim it; the count then
    /// stays at one until [`InodeCache::free`].
    fn drop_ref(&self, index: usize, generation: u64) -> FsResult<bool> {
        self.with_slot(index, generation, |m| {
            if m.ref_cnt == 1 && m.state == SlotState::PendingDelete {
                true
            } else {
                m.ref_cnt -= 1;
                false
            }
        })
    }

    pub(crate) fn free(&self, index: usize) {
        let mut meta = self.meta.lock();
        let m = &mut meta[index];
        m.key = None;
        m.ref_cnt = 0;
        m.state = SlotState::Free;
        m.name.clear();
        m.parent = None;
    }

    /// Number of slots with at least one handle.
    pub fn in_use(&self) -> usize {
        self.meta.lock().iter().filter(|m| m.ref_cnt > 0).count()
    }

    /// Number of handles on the slot bound to `key`.
    pub fn ref_count(&self, key: InodeKey) -> usize {
        self.meta
            .lock()
            .iter()
            .find(|m| m.key == Some(key) && m.state != SlotState::Free)
            .map_or(0, |m| m.ref_cnt)
    }
}

/// Pick a slot to rebind: a free one first, then any without handles.
fn victim(meta: &[SlotMeta]) -> FsResult<usize> {
    meta.iter()
        .position(|m| m.state == SlotState::Free)
        .or_else(|| meta.iter().position(|m| m.ref_cnt == 0))
        .ok_or(FsError::NoInode)
}

/// A counted handle on a cached inode
///
/// Dropping the handle puts the reference; [`Inode::put`] does the same but
/// reports errors from reclaiming an unlinked inode.
pub struct Inode {
    fs: Arc<Fat32FS>,
    index: usize,
    generation: u64,
    key: InodeKey,
    released: bool,
}

impl Inode {
    pub(crate) fn new(fs: Arc<Fat32FS>, index: usize, generation: u64, key: InodeKey) -> Self {
        Self {
            fs,
            index,
            generation,
            key,
            released: false,
        }
    }

    pub fn key(&self) -> InodeKey {
        self.key
    }

    pub fn fs(&self) -> &Arc<Fat32FS> {
        &self.fs
    }

    /// cached name, `/` for the root
    pub fn name(&self) -> FsResult<String> {
        self.fs
            .inodes
            .with_slot(self.index, self.generation, |m| m.name.clone())
    }

    /// key of the directory this inode was found in, if known
    pub fn parent(&self) -> Option<InodeKey> {
        self.fs
            .inodes
            .with_slot(self.index, self.generation, |m| m.parent)
            .ok()
            .flatten()
    }

    pub fn ref_count(&self) -> usize {
        self.fs
            .inodes
            .with_slot(self.index, self.generation, |m| m.ref_cnt)
            .unwrap_or(0)
    }

    pub fn dup(&self) -> FsResult<Inode> {
        self.fs.inodes.dup(self.index, self.generation)?;
        Ok(Inode::new(Arc::clone(&self.fs), self.index, self.generation, self.key))
    }

    /// Lock the inode, reading its short record on first use.
    pub fn lock(&self) -> FsResult<InodeGuard<'_>> {
        self.fs.inodes.with_slot(self.index, self.generation, |_| ())?;
        let mut data = self.fs.inodes.slots[self.index].lock();
        if !data.valid || data.generation != self.generation {
            self.hydrate(&mut data)?;
            self.fs.inodes.mark_valid(self.index, self.generation)?;
        }
        Ok(InodeGuard { inode: self, data })
    }

    fn hydrate(&self, data: &mut InodeData) -> FsResult<()> {
        data.valid = false;
        let entry = if self.key.is_root() {
            ShortDirEntry::new(
                [b' '; 11],
                FileAttributes::DIRECTORY,
                self.fs.sb.root_cluster,
                FatTimestamp::default(),
            )
        } else {
            match self.fs.read_slot(self.key)? {
                DirSlot::Short(entry) if entry.attr != 0 => entry,
                _ => {
                    error!("fat32: inode {:?} has no backing short record", self.key);
                    return Err(FsError::Corrupted("inode record has no attributes"));
                }
            }
        };
        let (cluster_end, cluster_count) = match entry.start_cluster() {
            0 => (0, 0),
            start => self.fs.fat.travel(start, 0)?,
        };
        data.type_ = if entry.is_dir() {
            InodeType::Dir
        } else {
            InodeType::File
        };
        data.entry = entry;
        data.cluster_end = cluster_end;
        data.cluster_count = cluster_count;
        data.generation = self.generation;
        data.valid = true;
        debug!(
            "fat32: inode {:?} loaded: {:?}, {} bytes, {} clusters",
            self.key,
            data.type_,
            entry.file_size(),
            cluster_count
        );
        Ok(())
    }

    /// Give up this handle.
    ///
    /// Putting the last handle on an unlinked inode releases its cluster
    /// chain and clears its on-disk attribute byte. Any other put only
    /// decrements the reference count.
    pub fn put(mut self) -> FsResult<()> {
        self.released = true;
        self.release()
    }

    fn release(&self) -> FsResult<()> {
        if !self.fs.inodes.drop_ref(self.index, self.generation)? {
            return Ok(());
        }
        let result = self.reclaim();
        self.fs.inodes.free(self.index);
        result
    }

    fn reclaim(&self) -> FsResult<()> {
        let mut data = self.fs.inodes.slots[self.index].lock();
        let start = data.entry.start_cluster();
        if data.valid && start >= FIRST_DATA_CLUSTER {
            self.fs.fat.truncate_chain(start)?;
        }
        data.valid = false;
        // the slot may hold a newer entry by now
        get_block_cache(self.fs.dev, self.key.sector as usize)?.modify(
            self.key.slot as usize * DIRENT_SZ,
            |raw: &mut [u8; DIRENT_SZ]| {
                if raw[0] == DELETED_MARK {
                    raw[11] = 0;
                }
            },
        );
        debug!("fat32: inode {:?} reclaimed", self.key);
        Ok(())
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.release() {
            error!("fat32: putting inode {:?}: {}", self.key, err);
        }
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.fs.dev)
            .field("key", &self.key)
            .field("slot", &self.index)
            .finish()
    }
}

/// An entry listed from a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub name: String,
    pub type_: InodeType,
    pub size: u32,
    pub key: InodeKey,
}

/// Exclusive access to a hydrated inode
pub struct InodeGuard<'a> {
    inode: &'a Inode,
    data: SleepLockGuard<'a, InodeData>,
}

impl<'a> InodeGuard<'a> {
    pub fn inode(&self) -> &'a Inode {
        self.inode
    }

    pub fn key(&self) -> InodeKey {
        self.inode.key
    }

    fn fs(&self) -> &'a Arc<Fat32FS> {
        &self.inode.fs
    }

    pub fn type_(&self) -> InodeType {
        self.data.type_
    }

    pub fn is_dir(&self) -> bool {
        self.data.type_ == InodeType::Dir
    }

    pub fn size(&self) -> u32 {
        self.data.entry.file_size()
    }

    pub fn attributes(&self) -> FileAttributes {
        self.data.entry.attributes()
    }

    pub fn cluster_start(&self) -> u32 {
        self.data.entry.start_cluster()
    }

    pub fn cluster_end(&self) -> u32 {
        self.data.cluster_end
    }

    pub fn cluster_count(&self) -> u32 {
        self.data.cluster_count
    }

    pub fn created(&self) -> FatTimestamp {
        self.data.entry.created()
    }

    pub fn modified(&self) -> FatTimestamp {
        self.data.entry.modified()
    }

    /// Release the lock.
    pub fn unlock(self) {}

    /// Write the in-memory fields back to the short record.
    pub fn update(&self) -> FsResult<()> {
        if self.inode.key.is_root() {
            return Ok(());
        }
        self.fs().write_slot(self.inode.key, &self.data.entry.as_bytes())
    }

    /// Set the user-settable attribute bits, keeping the type bits.
    pub fn set_attributes(&mut self, attr: FileAttributes) -> FsResult<()> {
        let settable = FileAttributes::READ_ONLY
            | FileAttributes::HIDDEN
            | FileAttributes::SYSTEM
            | FileAttributes::ARCHIVE;
        let kept = self.attributes() - settable;
        self.data.entry.attr = (kept | (attr & settable)).bits();
        self.update()
    }

    /// Walk the cluster chain, see [`FAT::travel`](super::fat::FAT::travel).
    /// A full walk (`k == 0`) refreshes the cached chain end and length.
    pub fn travel(&mut self, k: u32) -> FsResult<(u32, u32)> {
        let start = self.cluster_start();
        if start == 0 {
            return Ok((0, 0));
        }
        let (cluster, count) = self.fs().fat.travel(start, k)?;
        if k == 0 {
            self.data.cluster_end = cluster;
            self.data.cluster_count = count;
        }
        Ok((cluster, count))
    }

    /// Call `f(sector, offset in sector, file position, len)` for each piece
    /// of `[offset, end)`, which must lie inside the cluster chain.
    fn for_each_sector(
        &self,
        offset: usize,
        end: usize,
        mut f: impl FnMut(usize, usize, usize, usize) -> FsResult<()>,
    ) -> FsResult<()> {
        let fs = self.fs();
        let cluster_bytes = fs.cluster_bytes();
        let index = (offset / cluster_bytes) as u32 + 1;
        let (mut cluster, count) = fs.fat.travel(self.cluster_start(), index)?;
        if count != index {
            error!("fat32: inode {:?} chain shorter than its size", self.inode.key);
            return Err(FsError::Corrupted("cluster chain shorter than file"));
        }
        let mut pos = offset;
        while pos < end {
            let in_cluster = pos % cluster_bytes;
            let sector = fs.sb.cluster_to_sector(cluster) as usize + in_cluster / BLOCK_SZ;
            let in_sector = pos % BLOCK_SZ;
            let len = min(BLOCK_SZ - in_sector, end - pos);
            f(sector, in_sector, pos, len)?;
            pos += len;
            if pos < end && pos % cluster_bytes == 0 {
                cluster = fs
                    .fat
                    .next_cluster_id(cluster)?
                    .ok_or(FsError::Corrupted("cluster chain shorter than file"))?;
            }
        }
        Ok(())
    }

    /// Read file content at `offset`, returning the number of bytes read.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        if self.is_dir() {
            return Err(FsError::IsDir);
        }
        let size = self.size() as usize;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let end = min(size, offset + buf.len());
        let dev = self.fs().dev;
        self.for_each_sector(offset, end, |sector, in_sector, pos, len| {
            let block = get_block_cache(dev, sector)?;
            buf[pos - offset..pos - offset + len]
                .copy_from_slice(&block.data()[in_sector..in_sector + len]);
            Ok(())
        })?;
        Ok(end - offset)
    }

    /// Write file content at `offset`, growing the chain as needed.
    ///
    /// Bytes between the old end of file and `offset` read back as zeros.
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        if self.is_dir() {
            return Err(FsError::IsDir);
        }
        if self.attributes().contains(FileAttributes::READ_ONLY) {
            return Err(FsError::ReadOnly);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or(FsError::InvalidArgument)?;
        self.grow(end)?;
        let size = self.size() as usize;
        let dev = self.fs().dev;
        if offset > size {
            self.for_each_sector(size, offset, |sector, in_sector, _, len| {
                get_block_cache(dev, sector)?.data_mut()[in_sector..in_sector + len].fill(0);
                Ok(())
            })?;
        }
        self.for_each_sector(offset, end, |sector, in_sector, pos, len| {
            get_block_cache(dev, sector)?.data_mut()[in_sector..in_sector + len]
                .copy_from_slice(&buf[pos - offset..pos - offset + len]);
            Ok(())
        })?;
        if end > size {
            self.data.entry.set_file_size(end as u32);
        }
        self.data.entry.set_modified(FatTimestamp::now());
        self.update()?;
        Ok(buf.len())
    }

    /// Extend the chain until it covers `len` bytes.
    fn grow(&mut self, len: usize) -> FsResult<()> {
        let fs = Arc::clone(self.fs());
        let cluster_bytes = fs.cluster_bytes();
        let needed = ((len + cluster_bytes - 1) / cluster_bytes) as u32;
        if self.data.cluster_count >= needed {
            return Ok(());
        }
        if self.cluster_start() == 0 {
            let cluster = fs.fat.alloc_new_cluster()?;
            self.data.entry.set_start_cluster(cluster);
            self.data.cluster_end = cluster;
            self.data.cluster_count = 1;
            self.update()?;
        }
        while self.data.cluster_count < needed {
            let cluster = fs.fat.alloc_new_cluster()?;
            fs.fat.link(self.data.cluster_end, cluster)?;
            self.data.cluster_end = cluster;
            self.data.cluster_count += 1;
        }
        trace!(
            "fat32: inode {:?} grown to {} clusters",
            self.inode.key,
            self.data.cluster_count
        );
        Ok(())
    }

    /// Drop the content: size becomes 0 and every cluster of the chain is
    /// marked end-of-chain. The clusters are not returned to the free pool;
    /// the first one stays attached to the inode.
    pub fn truncate(&mut self) -> FsResult<()> {
        if self.attributes().contains(FileAttributes::READ_ONLY) {
            return Err(FsError::ReadOnly);
        }
        let start = self.cluster_start();
        if start != 0 {
            self.fs().fat.truncate_chain(start)?;
            self.data.cluster_end = start;
            self.data.cluster_count = 1;
        }
        if !self.is_dir() {
            self.data.entry.set_file_size(0);
        }
        self.data.entry.set_modified(FatTimestamp::now());
        self.update()
    }

    fn dir_cluster(&self) -> FsResult<u32> {
        if !self.is_dir() {
            return Err(FsError::NotDir);
        }
        let cluster = self.cluster_start();
        if !self.inode.key.is_root() && cluster < FIRST_DATA_CLUSTER {
            error!("fat32: directory {:?} has first cluster {}", self.inode.key, cluster);
            return Err(FsError::Corrupted("directory has no cluster"));
        }
        Ok(cluster)
    }

    /// Find `name` in this directory, ignoring case. The 8.3 alias of an
    /// entry matches as well as its long name.
    pub fn dirlookup(&self, name: &str) -> FsResult<Option<Inode>> {
        let start = self.dir_cluster()?;
        match name {
            "" | "." => return self.inode.dup().map(Some),
            ".." => return self.parent_dir().map(Some),
            _ => {}
        }
        let found = self.fs().walk_entries(start, |dentry| {
            if !dentry.entry.is_dot()
                && (name_eq(&dentry.name, name) || name_eq(&dentry.entry.short_name(), name))
            {
                ControlFlow::Break((dentry.pos, dentry.name.clone()))
            } else {
                ControlFlow::Continue(())
            }
        })?;
        match found {
            Some((key, found_name)) => Ok(Some(self.fs().iget(key, &found_name, Some(self.inode.key))?)),
            None => Ok(None),
        }
    }

    fn parent_dir(&self) -> FsResult<Inode> {
        let fs = self.fs();
        if self.inode.key.is_root() {
            return self.inode.dup();
        }
        if let Some(parent) = self.inode.parent() {
            let name = if parent.is_root() { "/" } else { "" };
            return fs.iget(parent, name, None);
        }
        let (key, name) = fs.parent_of(self.cluster_start())?;
        fs.iget(key, &name, None)
    }

    /// Create `name` in this directory.
    ///
    /// The inode slot and every cluster the entry needs, including those a
    /// full directory grows by, are secured before the directory is touched,
    /// so running out of either leaves the volume as it was.
    pub fn create(&mut self, name: &str, type_: InodeType) -> FsResult<Inode> {
        let start = self.dir_cluster()?;
        validate_name(name)?;
        let attr = match type_ {
            InodeType::File => FileAttributes::ARCHIVE,
            InodeType::Dir => FileAttributes::DIRECTORY,
            InodeType::Device => return Err(FsError::Unsupported),
        };
        let fs = Arc::clone(self.fs());
        let mut aliases: Vec<[u8; 11]> = Vec::new();
        let exists = fs.walk_entries(start, |dentry| {
            if name_eq(&dentry.name, name) || name_eq(&dentry.entry.short_name(), name) {
                return ControlFlow::Break(());
            }
            aliases.push(dentry.entry.name);
            ControlFlow::Continue(())
        })?;
        if exists.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let short_name = generate_short_name(name, |candidate| aliases.contains(candidate))?;
        let records = records_needed(name);
        let (mut run, grow) = fs.find_free_run(start, records)?;
        let (index, generation) = fs.inodes.reserve()?;
        let placed = fs.fat.alloc_clusters(grow + 1).and_then(|clusters| {
            fs.grow_dir(start, &mut run, records, &clusters[1..])?;
            let key = *run.last().ok_or(FsError::InvalidName)?;
            Ok((clusters[0], key))
        });
        let (cluster, key) = match placed {
            Ok(placed) => placed,
            Err(err) => {
                fs.inodes.free(index);
                return Err(err);
            }
        };
        fs.inodes.bind(index, generation, key, name, Some(self.inode.key))?;
        let inode = Inode::new(Arc::clone(&fs), index, generation, key);

        let stamp = FatTimestamp::now();
        let entry = ShortDirEntry::new(short_name, attr, cluster, stamp);
        if type_ == InodeType::Dir {
            let first = fs.sb.cluster_to_sector(cluster);
            let parent_cluster = if self.inode.key.is_root() { 0 } else { start };
            let dot = ShortDirEntry::dot(1, cluster, stamp);
            let dotdot = ShortDirEntry::dot(2, parent_cluster, stamp);
            fs.write_slot(InodeKey { sector: first, slot: 0 }, &dot.as_bytes())?;
            fs.write_slot(InodeKey { sector: first, slot: 1 }, &dotdot.as_bytes())?;
        }
        for (pos, record) in run.iter().zip(encode_name(name, &entry)?.iter()) {
            fs.write_slot(*pos, record)?;
        }
        self.data.entry.set_modified(stamp);
        self.update()?;
        debug!(
            "fat32: created {:?} {:?} at {:?} (alias {:?}, cluster {})",
            type_,
            name,
            key,
            entry.short_name(),
            cluster
        );
        Ok(inode)
    }

    /// Remove `child` from this directory by freeing its short record and
    /// the long records before it. Its storage is reclaimed when the last
    /// handle on it is put.
    pub fn delete(&mut self, child: &Inode) -> FsResult<()> {
        let start = self.dir_cluster()?;
        if child.key.is_root() || child.key == self.inode.key {
            return Err(FsError::InvalidArgument);
        }
        let fs = Arc::clone(self.fs());
        let child_guard = child.lock()?;
        let long_pos = fs
            .walk_entries(start, |dentry| {
                if dentry.pos == child.key && !dentry.entry.is_dot() {
                    ControlFlow::Break(dentry.long_pos.clone())
                } else {
                    ControlFlow::Continue(())
                }
            })?
            .ok_or(FsError::NotFound)?;
        fs.free_slots(&long_pos)?;
        fs.free_slots(&[child.key])?;
        fs.inodes.mark_deleted(child.index, child.generation)?;
        drop(child_guard);
        self.data.entry.set_modified(FatTimestamp::now());
        self.update()?;
        debug!("fat32: deleted {:?} ({} long records)", child.key, long_pos.len());
        Ok(())
    }

    /// True when the directory holds nothing but `.` and `..`.
    pub fn is_empty(&self) -> FsResult<bool> {
        let start = self.dir_cluster()?;
        let found = self.fs().walk_entries(start, |dentry| {
            if dentry.entry.is_dot() {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })?;
        Ok(found.is_none())
    }

    /// Every entry of the directory except `.` and `..`.
    pub fn list_entries(&self) -> FsResult<Vec<Dirent>> {
        let start = self.dir_cluster()?;
        let mut entries = Vec::new();
        self.fs().walk_entries(start, |dentry| {
            if !dentry.entry.is_dot() {
                entries.push(Dirent {
                    name: dentry.name.clone(),
                    type_: if dentry.entry.is_dir() {
                        InodeType::Dir
                    } else {
                        InodeType::File
                    },
                    size: dentry.entry.file_size(),
                    key: dentry.pos,
                });
            }
            ControlFlow::<()>::Continue(())
        })?;
        Ok(entries)
    }

    /// Names of every entry of the directory.
    pub fn ls(&self) -> FsResult<Vec<String>> {
        Ok(self.list_entries()?.into_iter().map(|entry| entry.name).collect())
    }

    pub fn stat(&self) -> Stat {
        let mode = match self.data.type_ {
            InodeType::File => StatMode::FILE,
            InodeType::Dir => StatMode::DIR,
            InodeType::Device => StatMode::NULL,
        };
        let sectors = self.data.cluster_count as u64 * self.fs().sb.sectors_per_cluster as u64;
        Stat::new(
            self.fs().dev as u64,
            self.inode.key.ino(),
            mode.bits(),
            1,
            self.size() as i64,
            sectors,
            self.modified().to_unix() as i64,
            self.created().to_unix() as i64,
        )
    }
}
