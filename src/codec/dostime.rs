//! MS-DOS packed time and date fields

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Modification time as stored in ZIP headers
///
/// `time` packs `hours << 11 | minutes << 5 | seconds / 2` and `date` packs
/// `(year - 1980) << 9 | month << 5 | day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant
    pub const EPOCH: Self = Self {
        time: 0,
        date: (1 << 5) | 1,
    };

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Packs a UTC timestamp, clamping to the 1980..=2107 range
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self::EPOCH;
        }
        if year > 2107 {
            return Self {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        let seconds = (dt.second() / 2).min(29);
        let time = (dt.hour() << 11) | (dt.minute() << 5) | seconds;
        let date = (((year - 1980) as u32) << 9) | (dt.month() << 5) | dt.day();
        Self {
            time: time as u16,
            date: date as u16,
        }
    }

    /// Unpacks the fields; `None` when they do not name a real instant
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let year = 1980 + (self.date >> 9) as i32;
        let month = ((self.date >> 5) & 0x0F) as u32;
        let day = (self.date & 0x1F) as u32;
        let hour = (self.time >> 11) as u32;
        let minute = ((self.time >> 5) & 0x3F) as u32;
        let second = ((self.time & 0x1F) * 2) as u32;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}
