//! Packed FAT date and time stamps
//!
//! date: `yyyyyyym mmmddddd` (years since 1980), time: `hhhhhmmm mmmsssss`
//! (seconds halved), plus a byte of 10 ms units for the odd second.

use lazy_static::lazy_static;
use spin::RwLock;

/// 1980-01-01T00:00:00Z as unix time
pub const FAT_EPOCH: u64 = 315_532_800;

fn epoch_clock() -> u64 {
    FAT_EPOCH
}

lazy_static! {
    static ref CLOCK: RwLock<fn() -> u64> = RwLock::new(epoch_clock as fn() -> u64);
}

/// Install the wall clock (unix seconds) used to stamp entries.
pub fn set_clock(clock: fn() -> u64) {
    *CLOCK.write() = clock;
}

/// Current unix time according to the installed clock.
pub fn now() -> u64 {
    let clock = *CLOCK.read();
    clock()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
    /// 10 ms units, 0..=199
    pub tenths: u8,
}

impl FatTimestamp {
    pub fn now() -> Self {
        Self::from_unix(now())
    }

    /// Convert unix seconds, clamped to the representable 1980..=2107 range.
    pub fn from_unix(secs: u64) -> Self {
        let secs = secs.max(FAT_EPOCH);
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (year, month, day) = civil_from_days(days);
        if year > 2107 {
            return Self {
                date: (127 << 9) | (12 << 5) | 31,
                time: (23 << 11) | (59 << 5) | 29,
                tenths: 100,
            };
        }
        let (hour, min, sec) = (rem / 3600, rem % 3600 / 60, rem % 60);
        Self {
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
            time: ((hour as u16) << 11) | ((min as u16) << 5) | (sec / 2) as u16,
            tenths: ((sec % 2) * 100) as u8,
        }
    }

    /// Unix seconds of the stamp; an all-zero date reads as the FAT epoch.
    pub fn to_unix(&self) -> u64 {
        let year = 1980 + (self.date >> 9) as i64;
        let month = (((self.date >> 5) & 0xF) as u32).clamp(1, 12);
        let day = ((self.date & 0x1F) as u32).max(1);
        let days = days_from_civil(year, month, day);
        let hour = (self.time >> 11) as u64;
        let min = ((self.time >> 5) & 0x3F) as u64;
        let sec = (self.time & 0x1F) as u64 * 2 + self.tenths as u64 / 100;
        days as u64 * 86_400 + hour * 3600 + min * 60 + sec
    }

    pub fn year(&self) -> u32 {
        1980 + (self.date >> 9) as u32
    }

    pub fn month(&self) -> u32 {
        ((self.date >> 5) & 0xF) as u32
    }

    pub fn day(&self) -> u32 {
        (self.date & 0x1F) as u32
    }
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + if m <= 2 { 1 } else { 0 };
    (y, m, d)
}
