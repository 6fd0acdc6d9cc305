//! Timestamp normalization
//!
//! Forum listings render dates in several shapes depending on their age.
//! Everything is interpreted in the offset of `reference_now`, which is the
//! forum's local time.
//!
//! | Input | Result |
//! |-------|--------|
//! | `2025-12-7 08:53[:SS]`, `/` or `.` separators | that instant |
//! | `2025-12-7` | midnight |
//! | `今天` / `today`, `昨天` / `yesterday`, `前天` | midnight of that day |
//! | `昨天 08:53` | that day at that time |
//! | `08:53` | today at that time |
//! | `刚刚`, `5 分钟前`, `半小时前`, `3 天前` | relative to now |
//! | anything else | `reference_now` |

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;

static ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})(?:\s+(\d{1,2}):(\d{1,2})(?::(\d{1,2}))?)?$")
        .expect("absolute date pattern is valid")
});

static DAY_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(今天|昨天|前天|today|yesterday)(?:\s*(\d{1,2}):(\d{1,2}))?$")
        .expect("day word pattern is valid")
});

static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{1,2})$").expect("clock pattern is valid"));

static AGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,6})\s*(秒|分钟|小时|天)前$").expect("relative pattern is valid")
});

/// Converts a rendered date into an absolute timestamp
///
/// Pure: the same `raw` and `reference_now` always give the same result.
/// Unrecognised or impossible dates (e.g. `2025-02-30`) fall back to
/// `reference_now`.
pub fn normalize(raw: &str, reference_now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let raw = raw.trim();
    if raw.is_empty() {
        return reference_now;
    }

    let parsed = parse_absolute(raw, &reference_now)
        .or_else(|| parse_day_word(raw, &reference_now))
        .or_else(|| parse_clock(raw, &reference_now))
        .or_else(|| parse_relative(raw, &reference_now));

    match parsed {
        Some(ts) => ts,
        None => {
            tracing::debug!(raw, "Unrecognised date, using reference time");
            reference_now
        }
    }
}

fn parse_absolute(raw: &str, now: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let caps = ABSOLUTE.captures(raw)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, num(2)?, num(3)?)?;
    let time = match (num(4), num(5)) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h, m, num(6).unwrap_or(0))?,
        _ => NaiveTime::from_hms_opt(0, 0, 0)?,
    };

    localize(date.and_time(time), now)
}

fn parse_day_word(raw: &str, now: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let caps = DAY_WORD.captures(raw)?;
    let days_back = match caps[1].to_lowercase().as_str() {
        "今天" | "today" => 0,
        "昨天" | "yesterday" => 1,
        _ => 2,
    };

    let time = match (caps.get(2), caps.get(3)) {
        (Some(h), Some(m)) => {
            NaiveTime::from_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, 0)?
        }
        _ => NaiveTime::from_hms_opt(0, 0, 0)?,
    };

    let date = now
        .date_naive()
        .checked_sub_signed(Duration::days(days_back))?;
    localize(date.and_time(time), now)
}

fn parse_clock(raw: &str, now: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let caps = CLOCK.captures(raw)?;
    let time = NaiveTime::from_hms_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, 0)?;
    localize(now.date_naive().and_time(time), now)
}

fn parse_relative(raw: &str, now: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    if raw == "刚刚" {
        return Some(*now);
    }
    if raw == "半小时前" {
        return now.checked_sub_signed(Duration::minutes(30));
    }

    let caps = AGO.captures(raw)?;
    let amount: i64 = caps[1].parse().ok()?;
    let span = match &caps[2] {
        "秒" => Duration::seconds(amount),
        "分钟" => Duration::minutes(amount),
        "小时" => Duration::hours(amount),
        _ => Duration::days(amount),
    };
    now.checked_sub_signed(span)
}

fn localize(naive: NaiveDateTime, now: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    now.offset().from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn now() -> DateTime<FixedOffset> {
        at(2025, 12, 10, 15, 0, 0)
    }

    #[test]
    fn test_unpadded_date_time() {
        assert_eq!(normalize("2025-12-7 08:53", now()), at(2025, 12, 7, 8, 53, 0));
        assert_eq!(normalize("2025-1-2 3:04:05", now()), at(2025, 1, 2, 3, 4, 5));
    }

    #[test]
    fn test_date_only_and_separators() {
        assert_eq!(normalize("2025-12-07", now()), at(2025, 12, 7, 0, 0, 0));
        assert_eq!(normalize("2025/12/7", now()), at(2025, 12, 7, 0, 0, 0));
        assert_eq!(normalize("2025.12.7 08:53", now()), at(2025, 12, 7, 8, 53, 0));
    }

    #[test]
    fn test_day_words() {
        let midnight = at(2025, 12, 10, 0, 0, 0);
        assert_eq!(normalize("今天", now()), midnight);
        assert_eq!(normalize("today", now()), midnight);
        assert_eq!(normalize("Today", now()), midnight);
        assert_eq!(normalize("昨天", now()), at(2025, 12, 9, 0, 0, 0));
        assert_eq!(normalize("yesterday", now()), at(2025, 12, 9, 0, 0, 0));
        assert_eq!(normalize("前天", now()), at(2025, 12, 8, 0, 0, 0));
        assert_eq!(normalize("昨天 08:53", now()), at(2025, 12, 9, 8, 53, 0));
    }

    #[test]
    fn test_bare_clock_is_today() {
        assert_eq!(normalize("08:53", now()), at(2025, 12, 10, 8, 53, 0));
    }

    #[test]
    fn test_relative_forms() {
        assert_eq!(normalize("刚刚", now()), now());
        assert_eq!(normalize("半小时前", now()), at(2025, 12, 10, 14, 30, 0));
        assert_eq!(normalize("5 分钟前", now()), at(2025, 12, 10, 14, 55, 0));
        assert_eq!(normalize("2 小时前", now()), at(2025, 12, 10, 13, 0, 0));
        assert_eq!(normalize("3 天前", now()), at(2025, 12, 7, 15, 0, 0));
        assert_eq!(normalize("30 秒前", now()), at(2025, 12, 10, 14, 59, 30));
    }

    #[test]
    fn test_garbage_falls_back_to_now() {
        assert_eq!(normalize("garbage", now()), now());
        assert_eq!(normalize("", now()), now());
        assert_eq!(normalize("2025-02-30", now()), now());
        assert_eq!(normalize("25:61", now()), now());
    }
}
