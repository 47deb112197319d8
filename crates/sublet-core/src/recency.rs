use chrono::{DateTime, Duration, Utc};

use crate::dates::parse_timestamp;

pub const DEFAULT_RECENCY_WINDOW_DAYS: i64 = 2;

/// Whether a post is at most `window` old at `now`.
///
/// The difference is taken between instants, so the post's own offset is
/// respected. Unparseable timestamps are never new.
pub fn is_recent_at(post_date: &str, window: Duration, now: DateTime<Utc>) -> bool {
    let Some(posted) = parse_timestamp(post_date) else {
        return false;
    };
    now.signed_duration_since(posted) <= window
}

pub fn is_recent(post_date: &str, window: Duration) -> bool {
    is_recent_at(post_date, window, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 12, 11, 0, 0).unwrap()
    }

    #[test]
    fn within_window_is_new() {
        let window = Duration::days(DEFAULT_RECENCY_WINDOW_DAYS);
        assert!(is_recent_at("2024-11-10T12:00:00+01:00", window, now()));
        assert!(is_recent_at("2024-11-12T09:00:00+01:00", window, now()));
    }

    #[test]
    fn older_than_window_is_not_new() {
        let window = Duration::days(DEFAULT_RECENCY_WINDOW_DAYS);
        assert!(!is_recent_at("2024-11-10T11:59:00+01:00", window, now()));
        assert!(!is_recent_at("2024-10-01T00:00:00+02:00", window, now()));
    }

    #[test]
    fn unparseable_timestamp_is_not_new() {
        assert!(!is_recent_at("yesterday", Duration::days(2), now()));
        assert!(!is_recent_at("", Duration::days(2), now()));
    }

    #[test]
    fn naive_timestamp_is_read_as_utc() {
        assert!(is_recent_at("2024-11-10T11:00:00", Duration::days(2), now()));
        assert!(!is_recent_at("2024-11-10T10:59:59", Duration::days(2), now()));
    }
}
