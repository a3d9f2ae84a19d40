//! Reusable formatting utilities for CLI output
//!
//! Timestamps, expiry distances, sizes and durations shared by the pretty
//! and table renderings.

use chrono::{DateTime, Local, Utc};
use std::time::Duration;

/// Format a UTC time in the local zone, e.g. `2025-01-15 14:30`
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Format an optional unix-millis timestamp in the local zone.
///
/// Returns "N/A" if missing or out of range.
pub fn format_millis_local(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(format_local)
        .unwrap_or_else(|| "N/A".to_string())
}

/// Describe an expiry relative to `now`.
///
/// # Example output
/// - `never` (permanent record)
/// - `in 5h 59m`
/// - `3m 0s ago`
pub fn format_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(expires_at) = expires_at else {
        return "never".to_string();
    };

    let delta = expires_at.signed_duration_since(now);
    match delta.to_std() {
        Ok(left) => format!("in {}", format_duration(left)),
        Err(_) => {
            let past = (-delta).to_std().unwrap_or_default();
            format!("{} ago", format_duration(past))
        }
    }
}

/// Format a duration coarsely: the two largest non-zero units.
///
/// # Example output
/// - `7d 0h`
/// - `2h 15m`
/// - `5m 10s`
/// - `45s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Shorten `text` to at most `max` characters, marking the cut with `…`
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_millis_local_missing() {
        assert_eq!(format_millis_local(None), "N/A");
        assert_eq!(format_millis_local(Some(i64::MAX)), "N/A");
    }

    #[test]
    fn test_format_millis_local_valid() {
        // Jan 15, 2025 12:00:00 UTC; exact output depends on local TZ
        let result = format_millis_local(Some(1_736_942_400_000));
        assert!(result.starts_with("2025-01-1"));
    }

    #[test]
    fn test_format_expiry() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_expiry(None, now), "never");
        assert_eq!(
            format_expiry(Some(now + chrono::Duration::minutes(359)), now),
            "in 5h 59m"
        );
        assert_eq!(
            format_expiry(Some(now - chrono::Duration::minutes(3)), now),
            "3m 0s ago"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7 * 86_400)), "7d 0h");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 8), "a much …");
    }
}
