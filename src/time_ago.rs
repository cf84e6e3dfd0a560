use chrono::{DateTime, Local, TimeZone, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Formats how long ago `timestamp` was, relative to `now`. \
/// Up to a week: `"45s ago"`, `"12m ago"`, `"3h ago"`, `"6d ago"`. Older timestamps are shown as local date (`M/D/YYYY`).
pub fn format_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format_timestamp_in(timestamp, now, &Local)
}

/// Like [`format_timestamp()`], but renders old dates in the given time zone
pub fn format_timestamp_in<Tz: TimeZone>(timestamp: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> String
    where Tz::Offset: std::fmt::Display
{
    // Clock skew can put fresh rows slightly in the future
    let seconds = (now - timestamp).num_seconds().max(0);
    match seconds {
        s if s < MINUTE => format!("{}s ago", s),
        s if s < HOUR => format!("{}m ago", s / MINUTE),
        s if s < DAY => format!("{}h ago", s / HOUR),
        s if s < WEEK => format!("{}d ago", s / DAY),
        _ => timestamp.with_timezone(tz).format("%-m/%-d/%Y").to_string(),
    }
}
