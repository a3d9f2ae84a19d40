//! Named leases for single-instance jobs
//!
//! A lease row grants one holder exclusive use of a job name until it is
//! released or its expiry passes. Because the row lives in the shared store,
//! exclusion holds across tasks and across processes using the same file.

use rusqlite::params;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{Database, duration_millis, now_millis};
use crate::error::StoreError;

static HOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Held lease; released on drop
pub struct LeaseGuard {
    db: Database,
    name: String,
    holder: String,
}

impl LeaseGuard {
    /// Try to take the named lease.
    ///
    /// Returns `None` when another live holder owns it. An expired lease is
    /// taken over, so a crashed holder blocks the job for at most `ttl`.
    pub fn try_acquire(
        db: &Database,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let holder = format!(
            "{}-{}",
            std::process::id(),
            HOLDER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let now = now_millis();
        let expires = now.saturating_add(duration_millis(ttl));

        let acquired = {
            let conn = db.lock()?;
            conn.execute(
                "INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE
                    SET holder = excluded.holder, expires_at = excluded.expires_at
                    WHERE leases.expires_at <= ?4",
                params![name, holder, expires, now],
            )?
        };

        if acquired == 0 {
            log::debug!("Lease {} is held elsewhere", name);
            return Ok(None);
        }

        Ok(Some(Self {
            db: db.clone(),
            name: name.to_string(),
            holder,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push the expiry out to `ttl` from now while this guard still holds it.
    ///
    /// Returns `false` once the lease has lapsed and another holder took it.
    pub fn renew(&self, ttl: Duration) -> Result<bool, StoreError> {
        let expires = now_millis().saturating_add(duration_millis(ttl));
        let conn = self.db.lock()?;
        let renewed = conn.execute(
            "UPDATE leases SET expires_at = ?3 WHERE name = ?1 AND holder = ?2",
            params![self.name, self.holder, expires],
        )?;
        Ok(renewed > 0)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let released = self.db.lock().map(|conn| {
            conn.execute(
                "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                params![self.name, self.holder],
            )
        });
        if !matches!(released, Ok(Ok(_))) {
            log::warn!("Failed to release lease {}; it will lapse on expiry", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let first = LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60)).unwrap();
        assert!(first.is_some());

        let second = LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60)).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_drop_releases() {
        let db = Database::open_in_memory().unwrap();
        {
            let _guard = LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60))
                .unwrap()
                .unwrap();
        }
        assert!(
            LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        let stale = LeaseGuard::try_acquire(&db, "sweep", Duration::ZERO)
            .unwrap()
            .unwrap();

        let fresh = LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60)).unwrap();
        assert!(fresh.is_some());

        // The stale holder's release must not remove the new holder's row
        drop(stale);
        assert!(
            LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_renew_keeps_lease_alive() {
        let db = Database::open_in_memory().unwrap();
        let guard = LeaseGuard::try_acquire(&db, "sweep", Duration::ZERO)
            .unwrap()
            .unwrap();

        assert!(guard.renew(Duration::from_secs(60)).unwrap());
        assert!(
            LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_renew_fails_after_takeover() {
        let db = Database::open_in_memory().unwrap();
        let lapsed = LeaseGuard::try_acquire(&db, "sweep", Duration::ZERO)
            .unwrap()
            .unwrap();
        let _current = LeaseGuard::try_acquire(&db, "sweep", Duration::from_secs(60))
            .unwrap()
            .unwrap();

        assert!(!lapsed.renew(Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_different_names_are_independent() {
        let db = Database::open_in_memory().unwrap();
        let _a = LeaseGuard::try_acquire(&db, "a", Duration::from_secs(60)).unwrap();
        let b = LeaseGuard::try_acquire(&db, "b", Duration::from_secs(60)).unwrap();
        assert!(b.is_some());
    }
}
