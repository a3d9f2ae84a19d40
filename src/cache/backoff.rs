//! Bounded retry backoff for failed upstream fetches
//!
//! Tracks consecutive failures per external id. After a failure the id is
//! blocked for `base * 2^(failures - 1)`, capped at `max`; a success clears it.
//! State lives in the shared store so separate processes back off together.

use rusqlite::{OptionalExtension, params};
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{Database, duration_millis, now_millis};

type Result<T> = std::result::Result<T, StoreError>;

/// What the last failed fetch ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream answered that the id does not exist
    NotFound,
    /// Error status, network trouble, timeout or an unusable payload
    Unavailable,
}

impl FailureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
        }
    }

    fn parse(text: &str) -> Self {
        match text {
            "not_found" => Self::NotFound,
            _ => Self::Unavailable,
        }
    }
}

/// An id that is currently backing off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub failures: u32,
    pub last: FailureKind,
    pub retry_in: Duration,
}

/// Store-backed tracker of upstream fetch failures
#[derive(Clone)]
pub struct FailureTracker {
    db: Database,
    base: Duration,
    max: Duration,
}

impl FailureTracker {
    pub fn new(db: Database, base: Duration, max: Duration) -> Self {
        Self {
            db,
            base,
            max: max.max(base),
        }
    }

    /// Backoff state for `key`, if it may not be fetched yet
    pub fn backoff(&self, key: &str) -> Result<Option<Backoff>> {
        let conn = self.db.lock()?;
        let row: Option<(u32, String, i64)> = conn
            .query_row(
                "SELECT failures, kind, retry_at FROM fetch_failures WHERE external_id = ?1",
                [key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let now = now_millis();
        Ok(row
            .filter(|(_, _, retry_at)| *retry_at > now)
            .map(|(failures, kind, retry_at)| Backoff {
                failures,
                last: FailureKind::parse(&kind),
                retry_in: Duration::from_millis(retry_at.saturating_sub(now).unsigned_abs()),
            }))
    }

    pub fn is_backing_off(&self, key: &str) -> Result<bool> {
        Ok(self.backoff(key)?.is_some())
    }

    /// Count a failure and return the delay until the next attempt
    pub fn record_failure(&self, key: &str, kind: FailureKind) -> Result<Duration> {
        let conn = self.db.lock()?;
        let failures: u32 = conn
            .query_row(
                "SELECT failures FROM fetch_failures WHERE external_id = ?1",
                [key],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let failures = failures.saturating_add(1);
        let delay = self.delay_for(failures);

        conn.execute(
            "INSERT OR REPLACE INTO fetch_failures (external_id, failures, kind, retry_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                failures,
                kind.as_str(),
                now_millis().saturating_add(duration_millis(delay))
            ],
        )?;
        log::debug!("Backing off {} for {:?} after {} failures", key, delay, failures);
        Ok(delay)
    }

    pub fn record_success(&self, key: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM fetch_failures WHERE external_id = ?1", [key])?;
        Ok(())
    }

    pub fn failures(&self, key: &str) -> Result<u32> {
        let conn = self.db.lock()?;
        let failures = conn
            .query_row(
                "SELECT failures FROM fetch_failures WHERE external_id = ?1",
                [key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(failures.unwrap_or(0))
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(base: Duration, max: Duration) -> FailureTracker {
        FailureTracker::new(Database::open_in_memory().unwrap(), base, max)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let tracker = tracker(Duration::from_secs(10), Duration::from_secs(35));
        let unavailable = FailureKind::Unavailable;
        assert_eq!(tracker.record_failure("x", unavailable).unwrap(), Duration::from_secs(10));
        assert_eq!(tracker.record_failure("x", unavailable).unwrap(), Duration::from_secs(20));
        assert_eq!(tracker.record_failure("x", unavailable).unwrap(), Duration::from_secs(35));
        assert_eq!(tracker.record_failure("x", unavailable).unwrap(), Duration::from_secs(35));
        assert_eq!(tracker.failures("x").unwrap(), 4);
    }

    #[test]
    fn test_success_clears_backoff() {
        let tracker = tracker(Duration::from_secs(60), Duration::from_secs(3600));
        tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        assert!(tracker.is_backing_off("x").unwrap());

        tracker.record_success("x").unwrap();
        assert!(!tracker.is_backing_off("x").unwrap());
        assert_eq!(tracker.failures("x").unwrap(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = tracker(Duration::from_secs(60), Duration::from_secs(3600));
        tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        assert!(!tracker.is_backing_off("y").unwrap());
    }

    #[test]
    fn test_zero_base_never_blocks() {
        let tracker = tracker(Duration::ZERO, Duration::ZERO);
        tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        assert!(!tracker.is_backing_off("x").unwrap());
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let tracker = tracker(Duration::from_secs(1), Duration::from_secs(3600));
        for _ in 0..100 {
            tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        }
        assert_eq!(
            tracker.record_failure("x", FailureKind::Unavailable).unwrap(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_last_kind_is_remembered() {
        let tracker = tracker(Duration::from_secs(60), Duration::from_secs(3600));
        tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        tracker.record_failure("x", FailureKind::NotFound).unwrap();

        let backoff = tracker.backoff("x").unwrap().unwrap();
        assert_eq!(backoff.failures, 2);
        assert_eq!(backoff.last, FailureKind::NotFound);
        assert!(backoff.retry_in > Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open_at(dir.path()).unwrap();
            let tracker = FailureTracker::new(db, Duration::from_secs(60), Duration::from_secs(600));
            tracker.record_failure("x", FailureKind::Unavailable).unwrap();
        }

        let db = Database::open_at(dir.path()).unwrap();
        let tracker = FailureTracker::new(db, Duration::from_secs(60), Duration::from_secs(600));
        assert!(tracker.is_backing_off("x").unwrap());
    }
}
