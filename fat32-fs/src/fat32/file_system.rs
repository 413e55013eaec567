use core::ops::ControlFlow;

use alloc::{string::String, sync::Arc, vec::Vec};

use super::{
    dentry::{decode_name, DirSlot, LongDirEntry, ShortDirEntry, DELETED_MARK},
    fat::{FsInfo, END_OF_CHAIN, FAT, FIRST_DATA_CLUSTER},
    inode::{Inode, InodeCache, InodeKey},
    super_block::{Fat32SB, Fat32SBLayout, FsInfoLayout},
    time,
};
use crate::{
    block::get_block_cache,
    config::{BLOCK_SZ, DIRENTS_PER_BLOCK, DIRENT_SZ, INODE_CACHE_SIZE},
    error::{FsError, FsResult},
};

/// offset of the 0x55AA boot sector signature
const BOOT_SIG_OFFSET: usize = 510;

/// A decoded directory entry together with where its records live
#[derive(Debug, Clone)]
pub struct Fat32Dentry {
    pub name: String,
    pub entry: ShortDirEntry,
    /// position of the short record, which is also the inode key
    pub pos: InodeKey,
    /// positions of the long records naming it, in on-disk order
    pub long_pos: Vec<InodeKey>,
}

/// Parameters of a fresh volume
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    /// computed from the volume size when `None`
    pub sectors_per_fat: Option<u32>,
    pub label: [u8; 11],
}

impl FormatOptions {
    pub fn new(total_sectors: u32) -> Self {
        Self {
            total_sectors,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            fat_count: 2,
            sectors_per_fat: None,
            label: *b"NO NAME    ",
        }
    }

    /// smallest FAT size covering every cluster left after the FATs themselves
    fn fat_size(&self) -> FsResult<u32> {
        let spc = self.sectors_per_cluster;
        if spc == 0 || !spc.is_power_of_two() || spc > 128 {
            return Err(FsError::InvalidArgument);
        }
        if let Some(spf) = self.sectors_per_fat {
            return Ok(spf);
        }
        let entries_per_sector = (BLOCK_SZ / 4) as u64;
        let total = self.total_sectors as u64;
        let mut spf = 1u64;
        loop {
            let meta = self.reserved_sectors as u64 + self.fat_count as u64 * spf;
            if meta >= total {
                return Err(FsError::InvalidArgument);
            }
            let clusters = (total - meta) / spc as u64;
            let need = (clusters + 2 + entries_per_sector - 1) / entries_per_sector;
            if need <= spf {
                return Ok(spf as u32);
            }
            spf = need;
        }
    }
}

pub struct Fat32FS {
    pub dev: usize,
    pub sb: Arc<Fat32SB>,
    pub fat: FAT,
    pub(crate) inodes: InodeCache,
}

impl Fat32FS {
    /// load a exist fat32 file system from block device
    pub fn load(dev: usize) -> FsResult<Arc<Self>> {
        let boot = get_block_cache(dev, 0)?;
        let layout = boot.read(0, |layout: &Fat32SBLayout| *layout);
        let signed = boot.data()[BOOT_SIG_OFFSET..] == [0x55, 0xAA];
        boot.release();
        if !signed {
            warn!("fat32: dev {} boot sector lacks 0x55AA signature", dev);
            return Err(FsError::BadSignature);
        }
        let sb = Arc::new(Fat32SB::from_layout(&layout)?);
        let fat = FAT::load(dev, Arc::clone(&sb))?;
        info!(
            "fat32: mounted dev {}: {} sectors, {} per cluster, data at {}, root cluster {}",
            dev,
            sb.total_sectors_32,
            sb.sectors_per_cluster,
            sb.data_base(),
            sb.root_cluster
        );
        Ok(Arc::new(Self {
            dev,
            sb,
            fat,
            inodes: InodeCache::new(INODE_CACHE_SIZE),
        }))
    }

    /// Write an empty FAT32 volume onto `dev`.
    pub fn format(dev: usize, opts: &FormatOptions) -> FsResult<()> {
        if opts.reserved_sectors < 8 || opts.fat_count == 0 {
            return Err(FsError::InvalidArgument);
        }
        let fat_size = opts.fat_size()?;
        let layout = Fat32SBLayout::new(
            opts.total_sectors,
            opts.sectors_per_cluster,
            opts.reserved_sectors,
            opts.fat_count,
            fat_size,
            time::now() as u32,
            opts.label,
        );
        let sb = Fat32SB::from_layout(&layout).map_err(|err| match err {
            FsError::Corrupted(_) => FsError::InvalidArgument,
            err => err,
        })?;
        let info = FsInfo {
            free_count: sb.max_cluster() - FIRST_DATA_CLUSTER,
            next_free: FIRST_DATA_CLUSTER + 1,
        };
        let (fsinfo, backup_fsinfo) = sb.fs_info_sectors();
        let backup_boot = sb.backup_boot_sector as u32;
        for sector in 0..sb.data_base() {
            let mut block = get_block_cache(dev, sector as usize)?;
            let data = block.data_mut();
            data.fill(0);
            if sector == 0 || sector == backup_boot {
                block.modify(0, |boot: &mut Fat32SBLayout| *boot = layout);
                block.data_mut()[BOOT_SIG_OFFSET..].copy_from_slice(&[0x55, 0xAA]);
            } else if sector == fsinfo || Some(sector) == backup_fsinfo {
                block.modify(0, |fs_info: &mut FsInfoLayout| {
                    *fs_info = FsInfoLayout::new(info.free_count, info.next_free)
                });
            }
        }
        for copy in 0..sb.fat_cnt as u32 {
            let sector = sb.fat_base() + copy * sb.fat_size_32;
            get_block_cache(dev, sector as usize)?.modify(0, |entries: &mut [u32; 3]| {
                *entries = [
                    (0x0FFF_FF00 | layout.media_type as u32).to_le(),
                    END_OF_CHAIN.to_le(),
                    END_OF_CHAIN.to_le(),
                ]
            });
        }
        let root = sb.cluster_to_sector(sb.root_cluster);
        for sector in root..root + sb.sectors_per_cluster as u32 {
            get_block_cache(dev, sector as usize)?.data_mut().fill(0);
        }
        info!(
            "fat32: formatted dev {}: {} sectors, FAT {} sectors x {}, {} free clusters",
            dev, opts.total_sectors, fat_size, opts.fat_count, info.free_count
        );
        Ok(())
    }

    /// get root inode
    pub fn root_inode(self: &Arc<Self>) -> FsResult<Inode> {
        self.iget(InodeKey::ROOT, "/", None)
    }

    /// Get a handle on the inode backed by the short record at `key`.
    pub fn iget(self: &Arc<Self>, key: InodeKey, name: &str, parent: Option<InodeKey>) -> FsResult<Inode> {
        let (index, generation) = self.inodes.get(key, name, parent)?;
        Ok(Inode::new(Arc::clone(self), index, generation, key))
    }

    /// Inodes currently referenced by some handle.
    pub fn inodes_in_use(&self) -> usize {
        self.inodes.in_use()
    }

    pub fn cluster_bytes(&self) -> usize {
        self.sb.cluster_bytes()
    }

    pub(crate) fn read_slot(&self, pos: InodeKey) -> FsResult<DirSlot> {
        let raw = get_block_cache(self.dev, pos.sector as usize)?
            .read(pos.slot as usize * DIRENT_SZ, |raw: &[u8; DIRENT_SZ]| *raw);
        Ok(DirSlot::from_bytes(&raw))
    }

    pub(crate) fn write_slot(&self, pos: InodeKey, record: &[u8; DIRENT_SZ]) -> FsResult<()> {
        get_block_cache(self.dev, pos.sector as usize)?
            .modify(pos.slot as usize * DIRENT_SZ, |raw: &mut [u8; DIRENT_SZ]| *raw = *record);
        Ok(())
    }

    /// Overwrite the first byte of each record with the free marker.
    pub(crate) fn free_slots(&self, positions: &[InodeKey]) -> FsResult<()> {
        for pos in positions {
            get_block_cache(self.dev, pos.sector as usize)?
                .modify(pos.slot as usize * DIRENT_SZ, |first: &mut u8| *first = DELETED_MARK);
        }
        Ok(())
    }

    /// Visit every 32-byte slot of the directory starting at `start_cluster`.
    ///
    /// Each sector is copied out of the cache before its slots are handed
    /// to `f`, so no buffer is held while `f` runs.
    pub(crate) fn walk_slots<T>(
        &self,
        start_cluster: u32,
        mut f: impl FnMut(InodeKey, DirSlot) -> ControlFlow<T>,
    ) -> FsResult<Option<T>> {
        let mut cluster = start_cluster;
        loop {
            self.fat.check_cluster(cluster)?;
            let first = self.sb.cluster_to_sector(cluster);
            for sector in first..first + self.sb.sectors_per_cluster as u32 {
                let data = *get_block_cache(self.dev, sector as usize)?.data();
                for slot in 0..DIRENTS_PER_BLOCK {
                    let mut raw = [0u8; DIRENT_SZ];
                    raw.copy_from_slice(&data[slot * DIRENT_SZ..(slot + 1) * DIRENT_SZ]);
                    let pos = InodeKey {
                        sector,
                        slot: slot as u16,
                    };
                    if let ControlFlow::Break(value) = f(pos, DirSlot::from_bytes(&raw)) {
                        return Ok(Some(value));
                    }
                }
            }
            match self.fat.next_cluster_id(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(None),
            }
        }
    }

    /// Visit every named entry of a directory up to its end marker.
    ///
    /// Long records are stacked as they are met and decoded against the
    /// short record that follows them. Volume labels are skipped.
    pub(crate) fn walk_entries<T>(
        &self,
        start_cluster: u32,
        mut f: impl FnMut(&Fat32Dentry) -> ControlFlow<T>,
    ) -> FsResult<Option<T>> {
        let mut longs: Vec<LongDirEntry> = Vec::new();
        let mut long_pos: Vec<InodeKey> = Vec::new();
        let found = self.walk_slots(start_cluster, |pos, slot| match slot {
            DirSlot::End => ControlFlow::Break(None),
            DirSlot::Free => {
                longs.clear();
                long_pos.clear();
                ControlFlow::Continue(())
            }
            DirSlot::Long(entry) => {
                if entry.is_last() {
                    longs.clear();
                    long_pos.clear();
                }
                longs.push(entry);
                long_pos.push(pos);
                ControlFlow::Continue(())
            }
            DirSlot::Short(entry) if entry.is_volume_id() => {
                longs.clear();
                long_pos.clear();
                ControlFlow::Continue(())
            }
            DirSlot::Short(entry) => {
                let dentry = Fat32Dentry {
                    name: decode_name(&longs, &entry),
                    entry,
                    pos,
                    long_pos: core::mem::take(&mut long_pos),
                };
                longs.clear();
                match f(&dentry) {
                    ControlFlow::Break(value) => ControlFlow::Break(Some(value)),
                    ControlFlow::Continue(()) => ControlFlow::Continue(()),
                }
            }
        })?;
        Ok(found.flatten())
    }

    /// Find `count` consecutive free slots in a directory.
    ///
    /// Interior gaps left by deleted entries are used first. Otherwise the
    /// free slots ending the directory are returned with the number of
    /// clusters [`Fat32FS::grow_dir`] must append to complete the run.
    pub(crate) fn find_free_run(&self, start_cluster: u32, count: usize) -> FsResult<(Vec<InodeKey>, u32)> {
        let mut run = Vec::with_capacity(count);
        let found = self.walk_slots(start_cluster, |pos, slot| {
            if slot.is_free() {
                run.push(pos);
                if run.len() == count {
                    return ControlFlow::Break(());
                }
            } else {
                run.clear();
            }
            ControlFlow::Continue(())
        })?;
        if found.is_some() {
            return Ok((run, 0));
        }
        let per_cluster = DIRENTS_PER_BLOCK * self.sb.sectors_per_cluster as usize;
        let missing = count - run.len();
        Ok((run, ((missing + per_cluster - 1) / per_cluster) as u32))
    }

    /// Link the freshly allocated `clusters` after the end of a directory and
    /// extend `run` over their first slots until it holds `count`.
    pub(crate) fn grow_dir(
        &self,
        start_cluster: u32,
        run: &mut Vec<InodeKey>,
        count: usize,
        clusters: &[u32],
    ) -> FsResult<()> {
        if clusters.is_empty() {
            return Ok(());
        }
        let (mut tail, _) = self.fat.travel(start_cluster, 0)?;
        for &cluster in clusters {
            self.fat.link(tail, cluster)?;
            debug!("fat32: directory at {} grew by cluster {}", start_cluster, cluster);
            tail = cluster;
            let first = self.sb.cluster_to_sector(cluster);
            'fill: for sector in first..first + self.sb.sectors_per_cluster as u32 {
                for slot in 0..DIRENTS_PER_BLOCK {
                    if run.len() == count {
                        break 'fill;
                    }
                    run.push(InodeKey {
                        sector,
                        slot: slot as u16,
                    });
                }
            }
        }
        Ok(())
    }

    /// first cluster named by the `..` record of a directory
    fn dotdot_cluster(&self, dir_cluster: u32) -> FsResult<u32> {
        self.fat.check_cluster(dir_cluster)?;
        let pos = InodeKey {
            sector: self.sb.cluster_to_sector(dir_cluster),
            slot: 1,
        };
        match self.read_slot(pos)? {
            DirSlot::Short(entry) if entry.name == *b"..         " => Ok(entry.start_cluster()),
            _ => {
                error!("fat32: directory at cluster {} has no '..' record", dir_cluster);
                Err(FsError::Corrupted("missing '..' record"))
            }
        }
    }

    /// Locate the parent of the directory starting at `dir_cluster`.
    ///
    /// The parent's first cluster comes from the directory's own `..`
    /// record; its key is found by scanning the grandparent for the entry
    /// pointing at that cluster.
    pub(crate) fn parent_of(&self, dir_cluster: u32) -> FsResult<(InodeKey, String)> {
        let parent = match self.dotdot_cluster(dir_cluster)? {
            0 => self.sb.root_cluster,
            cluster => cluster,
        };
        if parent == self.sb.root_cluster {
            return Ok((InodeKey::ROOT, String::from("/")));
        }
        let grand = match self.dotdot_cluster(parent)? {
            0 => self.sb.root_cluster,
            cluster => cluster,
        };
        self.walk_entries(grand, |dentry| {
            if dentry.entry.is_dir() && !dentry.entry.is_dot() && dentry.entry.start_cluster() == parent {
                ControlFlow::Break((dentry.pos, dentry.name.clone()))
            } else {
                ControlFlow::Continue(())
            }
        })?
        .ok_or(FsError::Corrupted("directory missing from its parent"))
    }
}
