use core::fmt::Debug;

use crate::{
    config::BLOCK_SZ,
    error::{FsError, FsResult},
};

/// FSInfo lead signature
pub const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
/// FSInfo structure signature
pub const FSINFO_STRUCT_SIG: u32 = 0x6141_7272;
/// FSInfo trail signature
pub const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;
/// free count / next free value meaning "unknown"
pub const FSINFO_UNKNOWN: u32 = 0xFFFF_FFFF;
/// highest cluster number FAT32 can address, the values above are markers
const MAX_CLUSTER: u32 = 0x0FFF_FFF6;

/// the geometry of a fat32 volume, immutable after mount
#[derive(Debug, Clone)]
pub struct Fat32SB {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors_cnt: u16,
    pub fat_cnt: u8,
    pub total_sectors_32: u32,
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub backup_boot_sector: u16,
}

impl Fat32SB {
    pub fn from_layout(layout: &Fat32SBLayout) -> FsResult<Self> {
        if !layout.is_valid() {
            return Err(FsError::BadSignature);
        }
        let sb = Self {
            bytes_per_sector: u16::from_le(layout.bytes_per_sector),
            sectors_per_cluster: layout.sectors_per_cluster,
            reserved_sectors_cnt: u16::from_le(layout.reserved_sectors_cnt),
            fat_cnt: layout.fat_cnt,
            total_sectors_32: u32::from_le(layout.total_sectors_32),
            fat_size_32: u32::from_le(layout.fat_size_32),
            root_cluster: u32::from_le(layout.root_cluster),
            fs_info: u16::from_le(layout.fs_info),
            backup_boot_sector: u16::from_le(layout.backup_boot_sector),
        };
        sb.check()?;
        Ok(sb)
    }

    fn check(&self) -> FsResult<()> {
        if self.bytes_per_sector as usize != BLOCK_SZ {
            return Err(FsError::Unsupported);
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(FsError::Corrupted("bad sectors per cluster"));
        }
        if self.fat_cnt == 0 || self.fat_size_32 == 0 || self.reserved_sectors_cnt == 0 {
            return Err(FsError::Corrupted("bad FAT region"));
        }
        // the other geometry methods rely on this sum fitting a sector number
        let data_base = (self.fat_cnt as u32)
            .checked_mul(self.fat_size_32)
            .and_then(|fats| fats.checked_add(self.reserved_sectors_cnt as u32))
            .ok_or(FsError::Corrupted("FAT region overflows"))?;
        if self.total_sectors_32 <= data_base {
            return Err(FsError::Corrupted("no data region"));
        }
        if self.root_cluster < 2 || self.root_cluster > self.max_cluster() {
            return Err(FsError::Corrupted("bad root cluster"));
        }
        Ok(())
    }

    /// first sector of the first FAT
    pub fn fat_base(&self) -> u32 {
        self.reserved_sectors_cnt as u32
    }

    /// first sector of the data region (cluster 2)
    pub fn data_base(&self) -> u32 {
        self.fat_base() + self.fat_cnt as u32 * self.fat_size_32
    }

    pub fn cluster_bytes(&self) -> usize {
        self.bytes_per_sector as usize * self.sectors_per_cluster as usize
    }

    /// first sector of `cluster`
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_base() + (cluster - 2) * self.sectors_per_cluster as u32
    }

    /// cluster containing data sector `sector`
    pub fn sector_to_cluster(&self, sector: u32) -> Option<u32> {
        if sector < self.data_base() {
            return None;
        }
        Some((sector - self.data_base()) / self.sectors_per_cluster as u32 + 2)
    }

    /// sector of the first FAT holding the entry of `cluster`
    pub fn fat_entry_sector(&self, cluster: u32) -> u32 {
        self.fat_base() + cluster / self.entries_per_sector()
    }

    /// byte offset of the entry of `cluster` inside its FAT sector
    pub fn fat_entry_offset(&self, cluster: u32) -> usize {
        (cluster % self.entries_per_sector()) as usize * 4
    }

    fn entries_per_sector(&self) -> u32 {
        self.bytes_per_sector as u32 / 4
    }

    /// number of clusters in the data region
    pub fn data_clusters(&self) -> u32 {
        (self.total_sectors_32 - self.data_base()) / self.sectors_per_cluster as u32
    }

    /// largest cluster number that is addressable by the FAT, backed by the
    /// disk and below the reserved entry values
    pub fn max_cluster(&self) -> u32 {
        let by_fat = self.fat_size_32.saturating_mul(self.entries_per_sector()) - 1;
        (self.data_clusters() + 1).min(by_fat).min(MAX_CLUSTER)
    }

    /// Whether `cluster` names a cluster of the data region.
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster <= self.max_cluster()
    }

    /// primary and (if present) backup FSInfo sectors
    pub fn fs_info_sectors(&self) -> (u32, Option<u32>) {
        let primary = self.fs_info as u32;
        let backup = match self.backup_boot_sector {
            0 | 0xFFFF => None,
            b => Some(b as u32 + primary),
        };
        (primary, backup)
    }
}

/// the boot sector layout of a fat32 file system
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Fat32SBLayout {
    pub jump_code: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors_cnt: u16,
    pub fat_cnt: u8,
    pub root_entry_cnt: u16,
    pub total_sectors_16: u16,
    pub media_type: u8,
    pub fat_size_16: u16,
    pub sectors_per_track: u16,
    pub head_cnt: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub fat_size_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub backup_boot_sector: u16,
    pub reserved_0: [u8; 12],
    pub drive_number: u8,
    pub reserved_1: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl Fat32SBLayout {
    /// Boot sector of a fresh volume.
    pub fn new(
        total_sectors: u32,
        sectors_per_cluster: u8,
        reserved_sectors: u16,
        fat_cnt: u8,
        fat_size: u32,
        volume_id: u32,
        label: [u8; 11],
    ) -> Self {
        Self {
            jump_code: [0xEB, 0x58, 0x90],
            oem_name: *b"FAT32-FS",
            bytes_per_sector: (BLOCK_SZ as u16).to_le(),
            sectors_per_cluster,
            reserved_sectors_cnt: reserved_sectors.to_le(),
            fat_cnt,
            root_entry_cnt: 0,
            total_sectors_16: 0,
            media_type: 0xF8,
            fat_size_16: 0,
            sectors_per_track: 32u16.to_le(),
            head_cnt: 64u16.to_le(),
            hidden_sectors: 0,
            total_sectors_32: total_sectors.to_le(),
            fat_size_32: fat_size.to_le(),
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 2u32.to_le(),
            fs_info: 1u16.to_le(),
            backup_boot_sector: 6u16.to_le(),
            reserved_0: [0; 12],
            drive_number: 0x80,
            reserved_1: 0,
            boot_signature: 0x29,
            volume_id: volume_id.to_le(),
            volume_label: label,
            fs_type: *b"FAT32   ",
        }
    }

    pub fn is_valid(&self) -> bool {
        let fat_size_16 = self.fat_size_16;
        self.fs_type == *b"FAT32   " && fat_size_16 == 0
    }
}

/// the FSInfo sector layout
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FsInfoLayout {
    pub lead_sig: u32,
    pub reserved_0: [u8; 480],
    pub struct_sig: u32,
    pub free_count: u32,
    pub next_free: u32,
    pub reserved_1: [u8; 12],
    pub trail_sig: u32,
}

impl FsInfoLayout {
    pub fn new(free_count: u32, next_free: u32) -> Self {
        Self {
            lead_sig: FSINFO_LEAD_SIG.to_le(),
            reserved_0: [0; 480],
            struct_sig: FSINFO_STRUCT_SIG.to_le(),
            free_count: free_count.to_le(),
            next_free: next_free.to_le(),
            reserved_1: [0; 12],
            trail_sig: FSINFO_TRAIL_SIG.to_le(),
        }
    }

    pub fn is_valid(&self) -> bool {
        u32::from_le(self.lead_sig) == FSINFO_LEAD_SIG
            && u32::from_le(self.struct_sig) == FSINFO_STRUCT_SIG
            && u32::from_le(self.trail_sig) == FSINFO_TRAIL_SIG
    }

    pub fn free_count(&self) -> u32 {
        u32::from_le(self.free_count)
    }

    pub fn next_free(&self) -> u32 {
        u32::from_le(self.next_free)
    }

    pub fn set(&mut self, free_count: u32, next_free: u32) {
        self.free_count = free_count.to_le();
        self.next_free = next_free.to_le();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(spc: u8, reserved: u16, fats: u8, spf: u32, total: u32) -> Fat32SB {
        let layout = Fat32SBLayout::new(total, spc, reserved, fats, spf, 0, *b"NO NAME    ");
        Fat32SB::from_layout(&layout).unwrap()
    }

    #[test]
    fn layout_sizes() {
        assert_eq!(core::mem::size_of::<Fat32SBLayout>(), 90);
        assert_eq!(core::mem::size_of::<FsInfoLayout>(), BLOCK_SZ);
    }

    #[test]
    fn data_base_and_cluster_mapping() {
        let sb = geometry(1, 32, 2, 100, 4096);
        assert_eq!(sb.fat_base(), 32);
        assert_eq!(sb.data_base(), 232);
        assert_eq!(sb.cluster_to_sector(2), 232);
        assert_eq!(sb.cluster_to_sector(10), 240);
        assert_eq!(sb.sector_to_cluster(240), Some(10));
        assert_eq!(sb.sector_to_cluster(100), None);
    }

    #[test]
    fn fat_entry_addressing() {
        let sb = geometry(8, 32, 2, 100, 65536);
        assert_eq!(sb.fat_entry_sector(0), 32);
        assert_eq!(sb.fat_entry_offset(5), 20);
        assert_eq!(sb.fat_entry_sector(128), 33);
        assert_eq!(sb.fat_entry_offset(128), 0);
        assert_eq!(sb.cluster_to_sector(3), 232 + 8);
        assert_eq!(sb.sector_to_cluster(232 + 15), Some(3));
    }

    #[test]
    fn max_cluster_bounded_by_fat_and_disk() {
        // 3864 data sectors but only 128 * 1 - 1 FAT entries
        let sb = geometry(1, 32, 2, 1, 4096 - 2 * 99);
        assert_eq!(sb.max_cluster(), 127);
        let sb = geometry(1, 32, 2, 100, 300);
        assert_eq!(sb.data_clusters(), 68);
        assert_eq!(sb.max_cluster(), 69);
    }

    #[test]
    fn rejects_foreign_volumes() {
        let mut layout = Fat32SBLayout::new(4096, 1, 32, 2, 100, 0, [b' '; 11]);
        layout.fs_type = *b"FAT16   ";
        assert_eq!(Fat32SB::from_layout(&layout).err(), Some(FsError::BadSignature));
        let mut layout = Fat32SBLayout::new(4096, 1, 32, 2, 100, 0, [b' '; 11]);
        layout.bytes_per_sector = 4096u16.to_le();
        assert_eq!(Fat32SB::from_layout(&layout).err(), Some(FsError::Unsupported));
    }

    #[test]
    fn oversized_fat_is_corruption() {
        let layout = Fat32SBLayout::new(4096, 1, 32, 2, 0x8000_0001, 0, [b' '; 11]);
        assert_eq!(
            Fat32SB::from_layout(&layout).err(),
            Some(FsError::Corrupted("FAT region overflows"))
        );
        let layout = Fat32SBLayout::new(4096, 1, 0xFFFF, 255, 0x0100_0000, 0, [b' '; 11]);
        assert!(matches!(Fat32SB::from_layout(&layout), Err(FsError::Corrupted(_))));
    }

    #[test]
    fn huge_volume_geometry_stays_in_range() {
        let sb = geometry(1, 32, 1, 0x0200_0000, u32::MAX);
        let max = sb.max_cluster();
        assert_eq!(max, 0x0FFF_FFF6);
        assert!(sb.is_data_cluster(max) && !sb.is_data_cluster(max + 1));
        assert!(!sb.is_data_cluster(0) && !sb.is_data_cluster(1));
        assert_eq!(sb.fat_entry_sector(max), 32 + max / 128);
        assert_eq!(sb.fat_entry_offset(max), (max % 128) as usize * 4);
        assert_eq!(sb.cluster_to_sector(max), sb.data_base() + max - 2);
    }

    #[test]
    fn fsinfo_signatures() {
        let mut info = FsInfoLayout::new(10, 3);
        assert!(info.is_valid());
        assert_eq!((info.free_count(), info.next_free()), (10, 3));
        info.trail_sig = 0;
        assert!(!info.is_valid());
    }
}
