//! Relative timestamp formatting for feed rows
//!
//! Renders "just now", "5m", "3h", "2d", and falls back to a short date
//! once an item is older than a week.

use chrono::{DateTime, Datelike, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;
const WEEK: i64 = 604_800;

/// Format `then_ms` (unix milliseconds) relative to `now_ms`.
///
/// Timestamps in the future (clock skew between client and server) are
/// clamped to "just now".
pub fn format_relative(now_ms: i64, then_ms: i64) -> String {
    let diff_secs = (now_ms - then_ms) / 1000;

    if diff_secs < MINUTE {
        return "just now".to_string();
    }
    if diff_secs < HOUR {
        return format!("{}m", diff_secs / MINUTE);
    }
    if diff_secs < DAY {
        return format!("{}h", diff_secs / HOUR);
    }
    if diff_secs < WEEK {
        return format!("{}d", diff_secs / DAY);
    }

    let now = timestamp_to_datetime(now_ms);
    let then = timestamp_to_datetime(then_ms);
    if now.year() == then.year() {
        then.format("%b %-d").to_string()
    } else {
        then.format("%b %-d, %Y").to_string()
    }
}

/// Format `then_ms` relative to the current wall clock.
pub fn format_relative_now(then_ms: i64) -> String {
    format_relative(crate::types::now_ms(), then_ms)
}

fn timestamp_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000; // 2023-11-14 22:13:20 UTC

    #[test]
    fn test_just_now() {
        assert_eq!(format_relative(NOW, NOW), "just now");
        assert_eq!(format_relative(NOW, NOW - 30_000), "just now");
    }

    #[test]
    fn test_future_clamped() {
        assert_eq!(format_relative(NOW, NOW + 120_000), "just now");
    }

    #[test]
    fn test_minutes() {
        assert_eq!(format_relative(NOW, NOW - 5 * 60_000), "5m");
        assert_eq!(format_relative(NOW, NOW - 59 * 60_000), "59m");
    }

    #[test]
    fn test_hours() {
        assert_eq!(format_relative(NOW, NOW - 3 * 3_600_000), "3h");
        assert_eq!(format_relative(NOW, NOW - 23 * 3_600_000), "23h");
    }

    #[test]
    fn test_days() {
        assert_eq!(format_relative(NOW, NOW - 2 * 86_400_000), "2d");
        assert_eq!(format_relative(NOW, NOW - 6 * 86_400_000), "6d");
    }

    #[test]
    fn test_same_year_date() {
        // 30 days back stays in 2023
        let then = NOW - 30 * 86_400_000;
        assert_eq!(format_relative(NOW, then), "Oct 15");
    }

    #[test]
    fn test_cross_year_date() {
        let then = NOW - 400 * 86_400_000;
        assert_eq!(format_relative(NOW, then), "Oct 10, 2022");
    }
}
