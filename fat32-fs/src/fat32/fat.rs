//! Cluster-chain allocator over the File Allocation Table

use alloc::{sync::Arc, vec::Vec};

use super::super_block::{Fat32SB, FsInfoLayout, FSINFO_UNKNOWN};
use crate::{
    block::get_block_cache,
    error::{FsError, FsResult},
    sync::SleepLock,
};

/// FAT entry of a free cluster
pub const FREE_CLUSTER: u32 = 0;
/// smallest FAT entry value meaning end-of-chain
pub const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;
/// value written to mark end-of-chain
pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;
/// FAT entry of a bad cluster
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
/// the upper four bits of an entry are reserved
pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
/// first cluster of the data region
pub const FIRST_DATA_CLUSTER: u32 = 2;

/// Free-space hints persisted in the FSInfo sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

pub struct FAT {
    dev: usize,
    sb: Arc<Fat32SB>,
    /// held for the whole of every allocation, so there is one mutation path
    info: SleepLock<FsInfo>,
}

impl FAT {
    /// Load the FAT of a mounted volume, verifying the FSInfo sector.
    ///
    /// An FSInfo copy with bad signatures or an impossible free count is not
    /// trusted: the free count is recomputed from the FAT and both copies are
    /// rewritten.
    pub fn load(dev: usize, sb: Arc<Fat32SB>) -> FsResult<Self> {
        let (primary, _) = sb.fs_info_sectors();
        let layout = get_block_cache(dev, primary as usize)?
            .read(0, |layout: &FsInfoLayout| *layout);
        let fat = Self {
            dev,
            sb,
            info: SleepLock::new(FsInfo {
                free_count: FSINFO_UNKNOWN,
                next_free: FIRST_DATA_CLUSTER,
            }),
        };
        let trusted = layout.is_valid()
            && layout.free_count() != FSINFO_UNKNOWN
            && layout.free_count() <= fat.sb.data_clusters();
        let info = if trusted {
            FsInfo {
                free_count: layout.free_count(),
                next_free: layout.next_free(),
            }
        } else {
            warn!(
                "fat32: dev {} FSInfo not trusted (signatures valid: {}), rescanning FAT",
                dev,
                layout.is_valid()
            );
            let info = FsInfo {
                free_count: fat.count_free()?,
                next_free: FIRST_DATA_CLUSTER,
            };
            fat.write_info(&info, true)?;
            info
        };
        *fat.info.lock() = info;
        debug!(
            "fat32: dev {} free clusters {} next free {}",
            dev, info.free_count, info.next_free
        );
        Ok(fat)
    }

    pub fn sb(&self) -> &Fat32SB {
        &self.sb
    }

    /// Snapshot of the in-memory free-space hints.
    pub fn info(&self) -> FsInfo {
        *self.info.lock()
    }

    pub fn free_count(&self) -> u32 {
        self.info().free_count
    }

    /// Reject cluster numbers outside the data region.
    pub fn check_cluster(&self, cluster: u32) -> FsResult<()> {
        if !self.sb.is_data_cluster(cluster) {
            error!("fat32: cluster {} out of range", cluster);
            return Err(FsError::Corrupted("cluster number out of range"));
        }
        Ok(())
    }

    fn read_entry(&self, cluster: u32) -> FsResult<u32> {
        let sector = self.sb.fat_entry_sector(cluster);
        let offset = self.sb.fat_entry_offset(cluster);
        let raw = get_block_cache(self.dev, sector as usize)?
            .read(offset, |data: &[u8; 4]| u32::from_le_bytes(*data));
        Ok(raw & CLUSTER_MASK)
    }

    /// Raw FAT entry of `cluster`: 0 free, >= [`END_OF_CHAIN_MIN`] end-of-chain,
    /// else the next cluster of the chain.
    pub fn next_cluster(&self, cluster: u32) -> FsResult<u32> {
        self.check_cluster(cluster)?;
        self.read_entry(cluster)
    }

    /// get next cluster number, `None` at the end of the chain
    pub fn next_cluster_id(&self, cluster: u32) -> FsResult<Option<u32>> {
        match self.next_cluster(cluster)? {
            next if next >= END_OF_CHAIN_MIN => Ok(None),
            FREE_CLUSTER | 1 | BAD_CLUSTER => {
                error!("fat32: chain broken after cluster {}", cluster);
                Err(FsError::Corrupted("broken cluster chain"))
            }
            next => {
                self.check_cluster(next)?;
                Ok(Some(next))
            }
        }
    }

    /// Set the entry of `cluster` in every FAT copy, keeping the reserved bits.
    pub fn set_entry(&self, cluster: u32, value: u32) -> FsResult<()> {
        self.check_cluster(cluster)?;
        let offset = self.sb.fat_entry_offset(cluster);
        for copy in 0..self.sb.fat_cnt as u32 {
            let sector = self.sb.fat_entry_sector(cluster) + copy * self.sb.fat_size_32;
            get_block_cache(self.dev, sector as usize)?.modify(offset, |data: &mut [u8; 4]| {
                let old = u32::from_le_bytes(*data);
                *data = ((old & !CLUSTER_MASK) | (value & CLUSTER_MASK)).to_le_bytes();
            });
        }
        trace!("fat32: FAT[{}] = {:#x}", cluster, value);
        Ok(())
    }

    /// Append `next` after `tail`.
    pub fn link(&self, tail: u32, next: u32) -> FsResult<()> {
        self.check_cluster(next)?;
        self.set_entry(tail, next)
    }

    /// Walk the chain from `start`.
    ///
    /// `k == 0` walks to the end and returns `(last cluster, cluster count)`.
    /// `k > 0` returns the k-th cluster (1-based), or the last cluster when
    /// the chain is shorter, together with its position.
    pub fn travel(&self, start: u32, k: u32) -> FsResult<(u32, u32)> {
        self.check_cluster(start)?;
        let mut cluster = start;
        let mut count = 1;
        let limit = self.sb.max_cluster();
        loop {
            if k != 0 && count == k {
                return Ok((cluster, count));
            }
            match self.next_cluster_id(cluster)? {
                Some(next) => {
                    cluster = next;
                    count += 1;
                    if count > limit {
                        return Err(FsError::Corrupted("cluster chain loops"));
                    }
                }
                None => return Ok((cluster, count)),
            }
        }
    }

    /// Allocate one cluster, mark it end-of-chain and zero its data.
    pub fn alloc_new_cluster(&self) -> FsResult<u32> {
        self.alloc_clusters(1)?.pop().ok_or(FsError::NoSpace)
    }

    /// Allocate `n` unlinked clusters, each marked end-of-chain and zeroed.
    ///
    /// Either all `n` are allocated or none: fails with [`FsError::NoSpace`]
    /// without touching the disk when fewer than `n` clusters are free, and
    /// hands back whatever it took when the FAT turns out to hold fewer free
    /// entries than the free count claims.
    pub fn alloc_clusters(&self, n: u32) -> FsResult<Vec<u32>> {
        let mut info = self.info.lock();
        if info.free_count < n {
            return Err(FsError::NoSpace);
        }
        let saved = *info;
        let mut clusters = Vec::with_capacity(n as usize);
        for _ in 0..n {
            match self.take_free(&mut info) {
                Ok(cluster) => clusters.push(cluster),
                Err(err) => {
                    warn!("fat32: dev {} free count {} is wrong", self.dev, saved.free_count);
                    for &cluster in &clusters {
                        self.set_entry(cluster, FREE_CLUSTER)?;
                    }
                    *info = saved;
                    return Err(err);
                }
            }
        }
        if n > 0 {
            self.write_info(&info, false)?;
        }
        drop(info);
        for &cluster in &clusters {
            self.zero_cluster(cluster)?;
            trace!("fat32: allocated cluster {}", cluster);
        }
        Ok(clusters)
    }

    /// Claim one free cluster, the next-free hint first, then by a linear
    /// scan. The caller holds the allocation lock and persists `info`.
    fn take_free(&self, info: &mut FsInfo) -> FsResult<u32> {
        let max = self.sb.max_cluster();
        let hint = info.next_free;
        let cluster = if self.sb.is_data_cluster(hint) && self.read_entry(hint)? == FREE_CLUSTER {
            hint
        } else {
            self.scan_free()?.ok_or(FsError::NoSpace)?
        };
        self.set_entry(cluster, END_OF_CHAIN)?;
        info.free_count -= 1;
        info.next_free = if cluster + 1 > max {
            FIRST_DATA_CLUSTER
        } else {
            cluster + 1
        };
        Ok(cluster)
    }

    /// first free cluster; cluster 2 holds the root directory
    fn scan_free(&self) -> FsResult<Option<u32>> {
        for cluster in FIRST_DATA_CLUSTER + 1..=self.sb.max_cluster() {
            if self.read_entry(cluster)? == FREE_CLUSTER {
                return Ok(Some(cluster));
            }
        }
        Ok(None)
    }

    /// Count free entries over the whole FAT.
    pub fn count_free(&self) -> FsResult<u32> {
        let mut free = 0;
        for cluster in FIRST_DATA_CLUSTER..=self.sb.max_cluster() {
            if self.read_entry(cluster)? == FREE_CLUSTER {
                free += 1;
            }
        }
        Ok(free)
    }

    /// Walk the chain from `start` marking every visited cluster end-of-chain.
    ///
    /// The clusters are not returned to the free pool and the free count is
    /// left untouched. Returns the number of clusters visited.
    pub fn truncate_chain(&self, start: u32) -> FsResult<u32> {
        let mut cluster = start;
        let mut visited = 0;
        loop {
            let next = self.next_cluster_id(cluster)?;
            self.set_entry(cluster, END_OF_CHAIN)?;
            visited += 1;
            match next {
                Some(n) if visited <= self.sb.max_cluster() => cluster = n,
                Some(_) => return Err(FsError::Corrupted("cluster chain loops")),
                None => break,
            }
        }
        debug!("fat32: truncated chain at {} ({} clusters)", start, visited);
        Ok(visited)
    }

    /// Fill the data sectors of `cluster` with zeros.
    pub fn zero_cluster(&self, cluster: u32) -> FsResult<()> {
        self.check_cluster(cluster)?;
        let first = self.sb.cluster_to_sector(cluster);
        for sector in first..first + self.sb.sectors_per_cluster as u32 {
            get_block_cache(self.dev, sector as usize)?.data_mut().fill(0);
        }
        Ok(())
    }

    /// Persist `info` to the primary and backup FSInfo sectors.
    fn write_info(&self, info: &FsInfo, rewrite: bool) -> FsResult<()> {
        let (primary, backup) = self.sb.fs_info_sectors();
        for sector in core::iter::once(primary).chain(backup) {
            get_block_cache(self.dev, sector as usize)?.modify(0, |layout: &mut FsInfoLayout| {
                if rewrite {
                    *layout = FsInfoLayout::new(info.free_count, info.next_free);
                } else {
                    layout.set(info.free_count, info.next_free);
                }
            });
        }
        Ok(())
    }

    /// Free-space hints as currently stored in the FSInfo sectors.
    pub fn on_disk_info(&self) -> FsResult<(FsInfo, Option<FsInfo>)> {
        let (primary, backup) = self.sb.fs_info_sectors();
        let read = |sector: u32| -> FsResult<FsInfo> {
            Ok(get_block_cache(self.dev, sector as usize)?.read(0, |layout: &FsInfoLayout| {
                FsInfo {
                    free_count: layout.free_count(),
                    next_free: layout.next_free(),
                }
            }))
        };
        let primary = read(primary)?;
        let backup = match backup {
            Some(sector) => Some(read(sector)?),
            None => None,
        };
        Ok((primary, backup))
    }
}
