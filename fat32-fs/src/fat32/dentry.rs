//! Short (8.3) and long (VFAT) directory entry records
//!
//! A long file name is stored as `ceil(len / 13)` long records placed, in
//! reverse ordinal order, right before the short record they name. Every
//! long record carries the checksum of that short record's 11-byte name.

use alloc::{string::String, vec::Vec};

use super::time::FatTimestamp;
use crate::{
    config::{DIRENT_SZ, MAX_NAME_LEN},
    error::{FsError, FsResult},
};

/// first name byte of a free record
pub const DELETED_MARK: u8 = 0xE5;
/// first name byte of the record that ends the directory
pub const END_MARK: u8 = 0x00;
/// first name byte standing for a literal 0xE5
const KANJI_E5: u8 = 0x05;
/// ordinal flag of the long record holding the end of the name
pub const LAST_LONG_ENTRY: u8 = 0x40;
/// UTF-16 units in one long record
pub const LONG_NAME_UNITS: usize = 13;

/// NT reserved byte: stem stored in lower case
const NT_LOWER_STEM: u8 = 0x08;
/// NT reserved byte: extension stored in lower case
const NT_LOWER_EXT: u8 = 0x10;

bitflags! {
    pub struct FileAttributes: u8 {
        const READ_ONLY  = 0b00000001;
        const HIDDEN     = 0b00000010;
        const SYSTEM     = 0b00000100;
        const VOLUME_ID  = 0b00001000;
        const DIRECTORY  = 0b00010000;
        const ARCHIVE    = 0b00100000;
        const LONG_NAME  = Self::READ_ONLY.bits
            | Self::HIDDEN.bits
            | Self::SYSTEM.bits
            | Self::VOLUME_ID.bits;
    }
}

/// Rotate-and-add checksum of an 11-byte short name.
pub fn checksum(name: &[u8; 11]) -> u8 {
    name.iter().fold(0u8, |sum, &b| {
        (if sum & 1 != 0 { 0x80u8 } else { 0 })
            .wrapping_add(sum >> 1)
            .wrapping_add(b)
    })
}

/// the layout of a fat32 short dentry
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ShortDirEntry {
    pub name: [u8; 11],
    pub attr: u8,
    pub nt_res: u8,
    pub create_time_tenth: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub start_cluster_high: u16,
    pub last_modify_time: u16,
    pub last_modify_date: u16,
    pub start_cluster_low: u16,
    pub file_size: u32,
}

impl ShortDirEntry {
    pub fn new(name: [u8; 11], attr: FileAttributes, start_cluster: u32, stamp: FatTimestamp) -> Self {
        let mut entry = Self {
            name,
            attr: attr.bits(),
            nt_res: 0,
            create_time_tenth: stamp.tenths,
            create_time: stamp.time.to_le(),
            create_date: stamp.date.to_le(),
            last_access_date: stamp.date.to_le(),
            start_cluster_high: 0,
            last_modify_time: stamp.time.to_le(),
            last_modify_date: stamp.date.to_le(),
            start_cluster_low: 0,
            file_size: 0,
        };
        entry.set_start_cluster(start_cluster);
        entry
    }

    /// `.` or `..` record of a new directory
    pub fn dot(dots: usize, start_cluster: u32, stamp: FatTimestamp) -> Self {
        let mut name = [b' '; 11];
        name[..dots].fill(b'.');
        Self::new(name, FileAttributes::DIRECTORY, start_cluster, stamp)
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.attr)
    }

    pub fn is_dir(&self) -> bool {
        self.attributes().contains(FileAttributes::DIRECTORY)
    }

    pub fn is_volume_id(&self) -> bool {
        self.attributes().contains(FileAttributes::VOLUME_ID)
    }

    pub fn is_dot(&self) -> bool {
        self.name == *b".          " || self.name == *b"..         "
    }

    pub fn start_cluster(&self) -> u32 {
        (u16::from_le(self.start_cluster_high) as u32) << 16
            | u16::from_le(self.start_cluster_low) as u32
    }

    pub fn set_start_cluster(&mut self, cluster: u32) {
        self.start_cluster_high = ((cluster >> 16) as u16).to_le();
        self.start_cluster_low = (cluster as u16).to_le();
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le(self.file_size)
    }

    pub fn set_file_size(&mut self, size: u32) {
        self.file_size = size.to_le();
    }

    pub fn created(&self) -> FatTimestamp {
        FatTimestamp {
            date: u16::from_le(self.create_date),
            time: u16::from_le(self.create_time),
            tenths: self.create_time_tenth,
        }
    }

    pub fn modified(&self) -> FatTimestamp {
        FatTimestamp {
            date: u16::from_le(self.last_modify_date),
            time: u16::from_le(self.last_modify_time),
            tenths: 0,
        }
    }

    pub fn set_modified(&mut self, stamp: FatTimestamp) {
        self.last_modify_date = stamp.date.to_le();
        self.last_modify_time = stamp.time.to_le();
        self.last_access_date = stamp.date.to_le();
    }

    /// name as stored, with a leading 0x05 restored to 0xE5
    pub fn raw_name(&self) -> [u8; 11] {
        let mut name = self.name;
        if name[0] == KANJI_E5 {
            name[0] = DELETED_MARK;
        }
        name
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.name)
    }

    /// Reconstruct `STEM.EXT` from the padded 8.3 name.
    pub fn short_name(&self) -> String {
        decode_short_name(&self.raw_name(), self.nt_res)
    }

    pub fn as_bytes(&self) -> [u8; DIRENT_SZ] {
        unsafe { core::mem::transmute::<Self, [u8; DIRENT_SZ]>(*self) }
    }
}

/// the layout of a fat32 long dentry
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct LongDirEntry {
    pub order: u8,
    pub name1: [u16; 5],
    pub attr: u8,
    pub type_: u8,
    pub checksum: u8,
    pub name2: [u16; 6],
    pub start_cluster: u16,
    pub name3: [u16; 2],
}

impl LongDirEntry {
    /// `units` holds at most 13 code units; the rest is 0x0000 then 0xFFFF.
    pub fn new(order: u8, units: &[u16], is_last: bool, checksum: u8) -> Self {
        let mut all = [0xFFFFu16; LONG_NAME_UNITS];
        all[..units.len()].copy_from_slice(units);
        if units.len() < LONG_NAME_UNITS {
            all[units.len()] = 0x0000;
        }
        let le = |u: u16| u.to_le();
        Self {
            order: if is_last { order | LAST_LONG_ENTRY } else { order },
            name1: [le(all[0]), le(all[1]), le(all[2]), le(all[3]), le(all[4])],
            attr: FileAttributes::LONG_NAME.bits(),
            type_: 0,
            checksum,
            name2: [
                le(all[5]),
                le(all[6]),
                le(all[7]),
                le(all[8]),
                le(all[9]),
                le(all[10]),
            ],
            start_cluster: 0,
            name3: [le(all[11]), le(all[12])],
        }
    }

    /// 1-based position of this record in the name
    pub fn ordinal(&self) -> u8 {
        self.order & !LAST_LONG_ENTRY
    }

    pub fn is_last(&self) -> bool {
        self.order & LAST_LONG_ENTRY != 0
    }

    /// the 13 code units carried by this record
    pub fn units(&self) -> [u16; LONG_NAME_UNITS] {
        let (n1, n2, n3) = (self.name1, self.name2, self.name3);
        let mut all = [0u16; LONG_NAME_UNITS];
        for (dst, src) in all.iter_mut().zip(n1.iter().chain(n2.iter()).chain(n3.iter())) {
            *dst = u16::from_le(*src);
        }
        all
    }

    pub fn as_bytes(&self) -> [u8; DIRENT_SZ] {
        unsafe { core::mem::transmute::<Self, [u8; DIRENT_SZ]>(*self) }
    }
}

/// One 32-byte directory slot, classified
#[derive(Debug, Clone, Copy)]
pub enum DirSlot {
    /// no record here or after
    End,
    /// deleted record
    Free,
    Long(LongDirEntry),
    Short(ShortDirEntry),
}

impl DirSlot {
    pub fn from_bytes(raw: &[u8; DIRENT_SZ]) -> Self {
        match raw[0] {
            END_MARK => Self::End,
            DELETED_MARK => Self::Free,
            _ if raw[11] & 0x3F == FileAttributes::LONG_NAME.bits() => {
                Self::Long(unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const LongDirEntry) })
            }
            _ => Self::Short(unsafe {
                core::ptr::read_unaligned(raw.as_ptr() as *const ShortDirEntry)
            }),
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Self::End | Self::Free)
    }
}

fn decode_short_name(name: &[u8; 11], nt_res: u8) -> String {
    let mut out = String::new();
    let lower_stem = nt_res & NT_LOWER_STEM != 0;
    let lower_ext = nt_res & NT_LOWER_EXT != 0;
    let stem_len = name[..8].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    for &b in &name[..stem_len] {
        out.push(if lower_stem { b.to_ascii_lowercase() } else { b } as char);
    }
    let ext_len = name[8..].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    if ext_len > 0 {
        out.push('.');
        for &b in &name[8..8 + ext_len] {
            out.push(if lower_ext { b.to_ascii_lowercase() } else { b } as char);
        }
    }
    out
}

/// Check that long records, in encounter order, form one complete name for `short`.
pub fn check_chain(longs: &[LongDirEntry], short: &ShortDirEntry) -> FsResult<()> {
    let sum = short.checksum();
    let n = longs.len();
    if n == 0 || !longs[0].is_last() || longs[0].ordinal() as usize != n {
        return Err(FsError::Corrupted("incomplete long name"));
    }
    for (i, entry) in longs.iter().enumerate() {
        if entry.ordinal() as usize != n - i || (i > 0 && entry.is_last()) {
            return Err(FsError::Corrupted("long name ordinals out of order"));
        }
        if entry.checksum != sum {
            return Err(FsError::ChecksumMismatch);
        }
    }
    Ok(())
}

/// Decode the name of `short`, given the long records met right before it.
///
/// Records are taken back off the stack in ordinal order and their name
/// fields concatenated up to the first 0x0000 or 0xFFFF unit. An absent or
/// invalid chain yields the 8.3 name.
pub fn decode_name(longs: &[LongDirEntry], short: &ShortDirEntry) -> String {
    if longs.is_empty() {
        return short.short_name();
    }
    if let Err(err) = check_chain(longs, short) {
        warn!(
            "fat32: dropping long name of {:?}: {}",
            short.short_name(),
            err
        );
        return short.short_name();
    }
    let mut units = Vec::with_capacity(longs.len() * LONG_NAME_UNITS);
    'records: for entry in longs.iter().rev() {
        for unit in entry.units() {
            if unit == 0x0000 || unit == 0xFFFF {
                break 'records;
            }
            units.push(unit);
        }
    }
    char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Reject names that cannot be stored as a long file name.
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidName);
    }
    if name.encode_utf16().count() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name
        .chars()
        .any(|c| (c as u32) < 0x20 || "\"*/:<>?\\|".contains(c))
    {
        return Err(FsError::InvalidName);
    }
    if name.trim_end_matches(|c| c == ' ' || c == '.').is_empty() {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

fn short_char(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c.to_ascii_uppercase() as u8),
        'A'..='Z' | '0'..='9' => Some(c as u8),
        '$' | '%' | '\'' | '-' | '_' | '@' | '~' | '`' | '!' | '(' | ')' | '{' | '}' | '^'
        | '#' | '&' => Some(c as u8),
        _ => None,
    }
}

/// Derive the 8.3 alias of `name`.
///
/// The stem and extension are upper-cased and stripped of characters 8.3
/// cannot hold. When the stem does not fit 8 characters, the conversion was
/// lossy, or the plain alias is `taken`, a `~N` tail with the smallest free N
/// replaces the end of the stem.
pub fn generate_short_name(name: &str, taken: impl Fn(&[u8; 11]) -> bool) -> FsResult<[u8; 11]> {
    let trimmed = name.trim_start_matches('.');
    let (stem, ext) = match trimmed.rfind('.') {
        Some(dot) => (&trimmed[..dot], &trimmed[dot + 1..]),
        None => (trimmed, ""),
    };
    let mut lossy = trimmed.len() != name.len();
    let mut convert = |part: &str| -> Vec<u8> {
        let mut out = Vec::new();
        for c in part.chars() {
            match c {
                ' ' | '.' => lossy = true,
                c => out.push(short_char(c).unwrap_or_else(|| {
                    lossy = true;
                    b'_'
                })),
            }
        }
        out
    };
    let stem = convert(stem);
    let ext = convert(ext);
    if stem.is_empty() && ext.is_empty() {
        return Err(FsError::InvalidName);
    }
    let lossy = lossy || stem.len() > 8 || ext.len() > 3;

    let mut short = [b' '; 11];
    let ext_len = ext.len().min(3);
    short[8..8 + ext_len].copy_from_slice(&ext[..ext_len]);
    if !lossy && !stem.is_empty() {
        short[..stem.len()].copy_from_slice(&stem);
        if !taken(&short) {
            return Ok(short);
        }
    }
    for n in 1u32..1_000_000 {
        let mut tail = [0u8; 8];
        let tail_len = write_tail(&mut tail, n);
        let keep = stem.len().min(8 - tail_len);
        let mut candidate = [b' '; 11];
        candidate[8..].copy_from_slice(&short[8..]);
        candidate[..keep].copy_from_slice(&stem[..keep]);
        candidate[keep..keep + tail_len].copy_from_slice(&tail[..tail_len]);
        if candidate[0] == DELETED_MARK {
            candidate[0] = KANJI_E5;
        }
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(FsError::AlreadyExists)
}

/// write `~n` into `buf`, returning its length
fn write_tail(buf: &mut [u8; 8], mut n: u32) -> usize {
    let mut digits = [0u8; 7];
    let mut len = 0;
    while n > 0 {
        digits[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
    }
    buf[0] = b'~';
    for i in 0..len {
        buf[1 + i] = digits[len - 1 - i];
    }
    len + 1
}

/// Build the records naming a new entry, in on-disk order: the long
/// records from the highest ordinal down, then `short` itself.
pub fn encode_name(name: &str, short: &ShortDirEntry) -> FsResult<Vec<[u8; DIRENT_SZ]>> {
    validate_name(name)?;
    let units: Vec<u16> = name.encode_utf16().collect();
    let sum = short.checksum();
    let count = (units.len() + LONG_NAME_UNITS - 1) / LONG_NAME_UNITS;
    let mut records = Vec::with_capacity(count + 1);
    for order in (1..=count).rev() {
        let begin = (order - 1) * LONG_NAME_UNITS;
        let end = (begin + LONG_NAME_UNITS).min(units.len());
        records.push(LongDirEntry::new(order as u8, &units[begin..end], order == count, sum).as_bytes());
    }
    records.push(short.as_bytes());
    Ok(records)
}

/// Number of 32-byte records `name` needs, long records plus the short one.
pub fn records_needed(name: &str) -> usize {
    let units = name.encode_utf16().count();
    (units + LONG_NAME_UNITS - 1) / LONG_NAME_UNITS + 1
}

/// Compare two names the way lookups do, ignoring case.
pub fn name_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_uppercase)
        .eq(b.chars().flat_map(char::to_uppercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn decode_records(records: &[[u8; DIRENT_SZ]]) -> String {
        let mut longs = Vec::new();
        for raw in records {
            match DirSlot::from_bytes(raw) {
                DirSlot::Long(entry) => longs.push(entry),
                DirSlot::Short(short) => return decode_name(&longs, &short),
                _ => panic!("unexpected free slot"),
            }
        }
        panic!("no short record")
    }

    fn short_for(name: &str) -> ShortDirEntry {
        let alias = generate_short_name(name, |_| false).unwrap();
        ShortDirEntry::new(alias, FileAttributes::ARCHIVE, 5, FatTimestamp::default())
    }

    #[test]
    fn record_sizes() {
        assert_eq!(core::mem::size_of::<ShortDirEntry>(), DIRENT_SZ);
        assert_eq!(core::mem::size_of::<LongDirEntry>(), DIRENT_SZ);
    }

    #[test]
    fn checksum_known_value() {
        // "README  TXT"
        let sum = checksum(b"README  TXT");
        assert_eq!(sum, checksum(b"README  TXT"));
        let mut other = *b"README  TXT";
        for i in 0..11 {
            other[i] ^= 0x01;
            assert_ne!(checksum(&other), sum, "byte {} flipped", i);
            other[i] ^= 0x01;
        }
    }

    #[test]
    fn long_names_survive_encoding() {
        for len in [1usize, 8, 12, 13, 14, 25, 255] {
            let name: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
            let records = encode_name(&name, &short_for(&name)).unwrap();
            assert_eq!(records.len(), (len + 12) / 13 + 1, "len {}", len);
            assert_eq!(decode_records(&records), name, "len {}", len);
        }
    }

    #[test]
    fn unicode_name_survives_encoding() {
        let name = "日本語のファイル名.txt";
        let records = encode_name(name, &short_for(name)).unwrap();
        assert_eq!(decode_records(&records), name);
    }

    #[test]
    fn long_records_in_reverse_order() {
        let name = "a-name-longer-than-thirteen.txt";
        let records = encode_name(name, &short_for(name)).unwrap();
        let orders: Vec<u8> = records[..records.len() - 1].iter().map(|r| r[0]).collect();
        assert_eq!(orders, [0x43, 0x02, 0x01]);
        assert!(records[..3].iter().all(|r| r[11] == 0x0F));
    }

    #[test]
    fn padding_after_terminator() {
        let entry = LongDirEntry::new(1, &[b'a' as u16, b'b' as u16], true, 0);
        let units = entry.units();
        assert_eq!(&units[..3], &[b'a' as u16, b'b' as u16, 0]);
        assert!(units[3..].iter().all(|&u| u == 0xFFFF));
    }

    #[test]
    fn checksum_mismatch_falls_back_to_short_name() {
        let name = "READMEFILE.TXT";
        let mut records = encode_name(name, &short_for(name)).unwrap();
        records[0][13] ^= 0xFF;
        assert_eq!(decode_records(&records), "README~1.TXT");
        let longs: Vec<LongDirEntry> = records[..2]
            .iter()
            .map(|raw| match DirSlot::from_bytes(raw) {
                DirSlot::Long(entry) => entry,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            check_chain(&longs, &short_for(name)),
            Err(FsError::ChecksumMismatch)
        );
    }

    #[test]
    fn missing_record_falls_back_to_short_name() {
        let name = "a-name-longer-than-thirteen.txt";
        let records = encode_name(name, &short_for(name)).unwrap();
        let short = records.len() - 1;
        let partial = [records[1], records[2], records[short]];
        assert_eq!(decode_records(&partial), "A-NAME~1.TXT");
    }

    #[test]
    fn short_name_fits() {
        assert_eq!(&generate_short_name("README.md", |_| false).unwrap(), b"README  MD ");
        assert_eq!(&generate_short_name("Makefile", |_| false).unwrap(), b"MAKEFILE   ");
    }

    #[test]
    fn short_name_gets_tail() {
        assert_eq!(&generate_short_name("READMEFILE.TXT", |_| false).unwrap(), b"README~1TXT");
        assert_eq!(&generate_short_name("archive.tar.gz", |_| false).unwrap(), b"ARCHIV~1GZ ");
        assert_eq!(&generate_short_name("my file.c", |_| false).unwrap(), b"MYFILE~1C  ");
        assert_eq!(&generate_short_name(".bashrc", |_| false).unwrap(), b"BASHRC~1   ");
        let taken = |n: &[u8; 11]| n == b"README~1TXT" || n == b"README~2TXT";
        assert_eq!(&generate_short_name("READMEFILE.TXT", taken).unwrap(), b"README~3TXT");
    }

    #[test]
    fn short_name_collision_without_loss() {
        let taken = |n: &[u8; 11]| n == b"NOTES   TXT";
        assert_eq!(&generate_short_name("notes.txt", taken).unwrap(), b"NOTES~1 TXT");
    }

    #[test]
    fn decode_short_names() {
        let mut entry = short_for("README.md");
        assert_eq!(entry.short_name(), "README.MD");
        entry.nt_res = NT_LOWER_EXT;
        assert_eq!(entry.short_name(), "README.md");
        let entry = ShortDirEntry::new(*b"MAKEFILE   ", FileAttributes::ARCHIVE, 2, FatTimestamp::default());
        assert_eq!(entry.short_name(), "MAKEFILE");
    }

    #[test]
    fn slot_classification() {
        let mut raw = [0u8; DIRENT_SZ];
        assert!(matches!(DirSlot::from_bytes(&raw), DirSlot::End));
        raw[0] = DELETED_MARK;
        assert!(matches!(DirSlot::from_bytes(&raw), DirSlot::Free));
        let short = short_for("x.bin");
        assert!(matches!(DirSlot::from_bytes(&short.as_bytes()), DirSlot::Short(_)));
        assert_eq!(short.start_cluster(), 5);
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_name(""), Err(FsError::InvalidName));
        assert_eq!(validate_name(".."), Err(FsError::InvalidName));
        assert_eq!(validate_name("a/b"), Err(FsError::InvalidName));
        assert_eq!(validate_name(&"x".repeat(256)), Err(FsError::NameTooLong));
        assert!(validate_name(&"x".repeat(255)).is_ok());
        assert!(name_eq("ReadMe.TXT", "readme.txt"));
        assert!(!name_eq("readme", "readme.txt"));
        assert_eq!("a".to_string(), decode_short_name(b"A          ", NT_LOWER_STEM));
    }
}
