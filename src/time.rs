//! Timezone resolution for user-facing timestamps.
//!
//! Clip filenames and event-store sharding must use the stream's configured local
//! timezone, never naive UTC — see SPEC_FULL.md §9. Log timestamps stay UTC and do
//! not go through this module.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Legacy numeric UTC-offset strings accepted for backward compatibility with
/// older deployments that configured a bare offset instead of an IANA zone name.
fn offset_to_tz(offset: &str) -> Option<Tz> {
    let tz_name = match offset {
        "-12" => "Etc/GMT+12",
        "-11" => "Etc/GMT+11",
        "-10" => "Etc/GMT+10",
        "-9" => "Etc/GMT+9",
        "-8" => "Etc/GMT+8",
        "-7" => "Etc/GMT+7",
        "-6" => "Etc/GMT+6",
        "-5" => "Etc/GMT+5",
        "-4" => "Etc/GMT+4",
        "-3" => "Etc/GMT+3",
        "-2" => "Etc/GMT+2",
        "-1" => "Etc/GMT+1",
        "0" => "UTC",
        "+1" => "Etc/GMT-1",
        "+2" => "Etc/GMT-2",
        "+3" => "Etc/GMT-3",
        "+4" => "Etc/GMT-4",
        "+5" => "Etc/GMT-5",
        "+6" => "Etc/GMT-6",
        "+7" => "Etc/GMT-7",
        "+8" => "Etc/GMT-8",
        "+9" => "Etc/GMT-9",
        "+10" => "Etc/GMT-10",
        "+11" => "Etc/GMT-11",
        "+12" => "Etc/GMT-12",
        _ => return None,
    };
    tz_name.parse().ok()
}

/// Resolve a configured timezone string, accepting both IANA names ("America/New_York")
/// and legacy numeric offsets ("-5", "+3").
pub fn parse_timezone(raw: &str) -> Tz {
    if let Some(tz) = offset_to_tz(raw.trim()) {
        return tz;
    }
    raw.trim().parse().unwrap_or(chrono_tz::UTC)
}

/// Current time rendered in the given timezone.
pub fn now_in_tz(tz: Tz) -> DateTime<Tz> {
    tz.from_utc_datetime(&Utc::now().naive_utc())
}

/// Convert a UTC instant into the given timezone.
pub fn to_tz(ts: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    ts.with_timezone(&tz)
}

/// `YYYY-MM-DD` in the given timezone, used for clip date directories and event-file names.
pub fn local_date_string(ts: DateTime<Utc>, tz: Tz) -> String {
    to_tz(ts, tz).format("%Y-%m-%d").to_string()
}

/// `HHMMSS` in the given timezone, used for clip filenames.
pub fn local_time_string(ts: DateTime<Utc>, tz: Tz) -> String {
    to_tz(ts, tz).format("%H%M%S").to_string()
}

/// Human-readable duration: "45s", "2m 5s", "1h 1m" — matches the reference daemon's
/// `format_duration` doctest examples exactly.
pub fn format_duration(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }
    if total_seconds < 3600 {
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        return format!("{}m {}s", minutes, seconds);
    }
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    format!("{}h {}m", hours, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iana_names() {
        assert_eq!(parse_timezone("America/New_York"), chrono_tz::America::New_York);
    }

    #[test]
    fn parses_legacy_offsets() {
        assert_eq!(parse_timezone("-5"), "Etc/GMT+5".parse::<Tz>().unwrap());
        assert_eq!(parse_timezone("0"), chrono_tz::UTC);
    }

    #[test]
    fn falls_back_to_utc_on_garbage() {
        assert_eq!(parse_timezone("not-a-timezone"), chrono_tz::UTC);
    }

    #[test]
    fn duration_formatting_matches_reference_examples() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
