//! Conversion between Unix epoch milliseconds and packed MS-DOS date/time.
//!
//! Layout of the packed value, high bit first:
//!
//! ```text
//! 31..25 year - 1980 | 24..21 month | 20..16 day | 15..11 hour | 10..5 minute | 4..0 second / 2
//! ```
//!
//! The fields are interpreted in the local time zone, as every unzip tool does. Seconds have a
//! 2-second resolution: odd seconds are truncated when encoding.

use chrono::{
    Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};

/// 1980-01-01 00:00:00, the earliest representable DOS time.
pub const DOS_TIME_MIN: u32 = (1 << 21) | (1 << 16);

/// 2107-12-31 23:59:58, the latest representable DOS time.
pub const DOS_TIME_MAX: u32 =
    (127 << 25) | (12 << 21) | (31 << 16) | (23 << 11) | (59 << 5) | (58 >> 1);

const DOS_EPOCH_YEAR: i32 = 1980;
const DOS_LAST_YEAR: i32 = DOS_EPOCH_YEAR + 127;

/// Converts an optional epoch millisecond timestamp. `None` stays unset.
#[inline]
pub fn to_dos_time(millis: Option<i64>) -> Option<u32> {
    millis.map(dos_time_from_millis)
}

/// Converts an optional packed DOS time back to epoch milliseconds. `None` stays unset.
#[inline]
pub fn to_epoch_millis(dos_time: Option<u32>) -> Option<i64> {
    dos_time.and_then(millis_from_dos_time)
}

/// Packs `millis` into DOS form, clamping instants before 1980 to [`DOS_TIME_MIN`] and after
/// 2107 to [`DOS_TIME_MAX`].
pub fn dos_time_from_millis(millis: i64) -> u32 {
    let local = match Local.timestamp_millis_opt(millis) {
        LocalResult::Single(time) | LocalResult::Ambiguous(time, _) => time,
        LocalResult::None if millis < 0 => return DOS_TIME_MIN,
        LocalResult::None => return DOS_TIME_MAX,
    };

    let year = local.year();
    if year < DOS_EPOCH_YEAR {
        return DOS_TIME_MIN;
    }
    if year > DOS_LAST_YEAR {
        return DOS_TIME_MAX;
    }

    ((year - DOS_EPOCH_YEAR) as u32) << 25
        | local.month() << 21
        | local.day() << 16
        | local.hour() << 11
        | local.minute() << 5
        | local.second() >> 1
}

/// Unpacks a DOS time into epoch milliseconds.
///
/// Out-of-range fields roll over the way a lenient calendar does: month 0 is December of the
/// previous year, day 0 the last day of the previous month. Returns `None` only if the result
/// cannot be placed on the local timeline.
pub fn millis_from_dos_time(dos_time: u32) -> Option<i64> {
    let year = ((dos_time >> 25) & 0x7F) as i32 + DOS_EPOCH_YEAR;
    let month = ((dos_time >> 21) & 0x0F) as i32;
    let day = i64::from((dos_time >> 16) & 0x1F);
    let hour = i64::from((dos_time >> 11) & 0x1F);
    let minute = i64::from((dos_time >> 5) & 0x3F);
    let second = i64::from((dos_time << 1) & 0x3E);

    let months = year * 12 + month - 1;
    let month_start = NaiveDate::from_ymd_opt(
        months.div_euclid(12),
        months.rem_euclid(12) as u32 + 1,
        1,
    )?
    .and_hms_opt(0, 0, 0)?;

    let naive = month_start
        + Duration::days(day - 1)
        + Duration::hours(hour)
        + Duration::minutes(minute)
        + Duration::seconds(second);

    local_to_millis(naive)
}

fn local_to_millis(naive: NaiveDateTime) -> Option<i64> {
    let resolved = match Local.from_local_datetime(&naive) {
        LocalResult::Single(time) | LocalResult::Ambiguous(time, _) => time,
        // Skipped by a DST transition
        LocalResult::None => Local
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()?,
    };
    Some(resolved.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_millis(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .earliest()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_unset_passes_through() {
        assert_eq!(to_dos_time(None), None);
        assert_eq!(to_epoch_millis(None), None);
    }

    #[test]
    fn test_pack_fields() {
        let millis = local_millis(2020, 5, 17, 13, 45, 31);
        let expected = (40 << 25) | (5 << 21) | (17 << 16) | (13 << 11) | (45 << 5) | 15;
        assert_eq!(dos_time_from_millis(millis), expected);
    }

    #[test]
    fn test_odd_seconds_round_down() {
        let dos = dos_time_from_millis(local_millis(2001, 2, 3, 4, 5, 7));
        let back = millis_from_dos_time(dos).unwrap();
        assert_eq!(back, local_millis(2001, 2, 3, 4, 5, 6));
    }

    #[test]
    fn test_before_1980_clamps() {
        assert_eq!(dos_time_from_millis(0), DOS_TIME_MIN);
        assert_eq!(dos_time_from_millis(local_millis(1979, 12, 31, 23, 59, 59)), DOS_TIME_MIN);
        assert_eq!(dos_time_from_millis(local_millis(1980, 1, 1, 0, 0, 0)), DOS_TIME_MIN);
        assert_eq!(
            millis_from_dos_time(DOS_TIME_MIN),
            Some(local_millis(1980, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_after_2107_clamps() {
        let millis = local_millis(2200, 6, 1, 12, 0, 0);
        assert_eq!(dos_time_from_millis(millis), DOS_TIME_MAX);
    }

    #[test]
    fn test_lenient_decode() {
        // 2000-00-00 is 1999-11-30
        let dos = 20 << 25;
        assert_eq!(
            millis_from_dos_time(dos),
            Some(local_millis(1999, 11, 30, 0, 0, 0))
        );
    }

    #[test]
    fn test_second_application_is_stable() {
        let samples = [
            local_millis(1980, 1, 1, 0, 0, 1),
            local_millis(1999, 12, 31, 23, 59, 59),
            local_millis(2024, 2, 29, 12, 30, 45),
            local_millis(2107, 12, 31, 23, 59, 59),
            1_700_000_000_123,
        ];
        for millis in samples {
            let once = dos_time_from_millis(millis);
            let twice = dos_time_from_millis(millis_from_dos_time(once).unwrap());
            assert_eq!(once, twice, "unstable for {millis}");
        }
    }
}
