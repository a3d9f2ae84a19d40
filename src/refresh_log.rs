//! Append-only log of "please refresh entity X" requests
//!
//! Requests are never deduplicated on write; the sweep collapses them per
//! entity. The log also guards the one-time follow-up sent when an entity
//! first exposes an owner contact.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::client::{FollowUpContext, FollowUpSender};
use crate::error::{Error, Result, StoreError};
use crate::store::{Database, LeaseGuard, duration_millis, from_millis, now_millis};

/// Lease name shared by every sweeper of the same store
const SWEEP_LEASE: &str = "refresh-log-sweep";

/// How a sweep selects and retries entries
#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Entries younger than this wait for a later sweep
    pub min_age: Duration,
    /// Distinct entity ids handled per sweep
    pub batch_limit: usize,
    /// Failed attempts before an entity's entries are given up on
    pub max_attempts: u32,
    /// Lifetime of the sweep lease; bounds how long a crashed sweep blocks others.
    /// A running sweep renews it every third of this period.
    pub lease_ttl: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            min_age: Duration::from_secs(24 * 60 * 60),
            batch_limit: 100,
            max_attempts: 5,
            lease_ttl: Duration::from_secs(600),
        }
    }
}

/// A single refresh request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshLogEntry {
    pub id: i64,
    pub entity_external_id: String,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub follow_up_sent: bool,
    pub resolved_contact: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Another sweep held the lease; nothing was done
    pub skipped: bool,
    /// The lease was lost mid-sweep; remaining entities were left pending
    pub interrupted: bool,
    pub distinct_ids: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entities whose entries were closed after `max_attempts` failures
    pub abandoned: usize,
    pub entries_processed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpOutcome {
    Sent,
    AlreadySent,
    NoContact,
    /// Nobody has asked to refresh this entity
    NotRequested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshLogStats {
    pub total: usize,
    pub pending: usize,
    pub processed: usize,
    pub follow_ups_sent: usize,
    pub distinct_pending: usize,
}

/// Handle to the refresh request log
#[derive(Clone)]
pub struct RefreshLog {
    db: Database,
    policy: SweepPolicy,
}

impl RefreshLog {
    pub fn new(db: Database, policy: SweepPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// Append a request. Duplicates are kept.
    pub fn record(&self, external_id: &str) -> Result<RefreshLogEntry> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(Error::Validation("external id is required".to_string()));
        }

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO refresh_log (entity_external_id, requested_at) VALUES (?1, ?2)",
            params![external_id, now_millis()],
        )
        .map_err(StoreError::from)?;
        let id = conn.last_insert_rowid();
        log::debug!("Recorded refresh request {} for {}", id, external_id);

        load_entry(&conn, id)?.ok_or_else(|| Error::NotFound(format!("refresh log entry {}", id)))
    }

    /// Every request ever recorded for an entity, oldest first
    pub fn entries_for(&self, external_id: &str) -> Result<Vec<RefreshLogEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM refresh_log WHERE entity_external_id = ?1 ORDER BY id",
                ENTRY_COLUMNS
            ))
            .map_err(StoreError::from)?;
        let entries = stmt
            .query_map([external_id], entry_from_row)
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        Ok(entries)
    }

    /// Process pending requests once per distinct entity.
    ///
    /// `batch` runs once for each entity with pending entries old enough to
    /// sweep. Success closes every grouped entry; failure leaves them pending
    /// with the attempt counted, until `max_attempts` closes them with the
    /// last error recorded. One entity's failure never affects another's.
    ///
    /// Only one sweep per store runs at a time. A sweep that finds the lease
    /// taken returns a skipped report without calling `batch`. The lease is
    /// renewed before and during every `batch` call; if it is lost anyway the
    /// sweep stops and leaves the current and remaining entities pending.
    pub async fn sweep_unprocessed<F, Fut>(&self, mut batch: F) -> Result<SweepReport>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(lease) = LeaseGuard::try_acquire(&self.db, SWEEP_LEASE, self.policy.lease_ttl)?
        else {
            log::info!("Refresh log sweep already running elsewhere, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let groups = self.pending_groups()?;
        let mut report = SweepReport {
            distinct_ids: groups.len(),
            ..SweepReport::default()
        };

        if groups.is_empty() {
            log::info!("No unprocessed refresh requests to sweep");
            return Ok(report);
        }
        log::info!("Sweeping refresh requests for {} entities", groups.len());

        for (external_id, up_to) in groups {
            if !lease.renew(self.policy.lease_ttl)? {
                log::warn!("Lost the sweep lease before {}; stopping", external_id);
                report.interrupted = true;
                break;
            }
            let Some(outcome) = self.while_leased(&lease, batch(external_id.clone())).await?
            else {
                log::warn!("Lost the sweep lease while refreshing {}; stopping", external_id);
                report.interrupted = true;
                break;
            };

            match outcome {
                Ok(()) => {
                    let closed = self.close_group(&external_id, up_to)?;
                    report.succeeded += 1;
                    report.entries_processed += closed;
                }
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Refresh of {} failed: {}", external_id, e);
                    let closed = self.record_failure(&external_id, up_to, &e.to_string())?;
                    if closed > 0 {
                        report.abandoned += 1;
                        report.entries_processed += closed;
                        log::warn!(
                            "Giving up on {} after {} attempts",
                            external_id,
                            self.policy.max_attempts
                        );
                    }
                }
            }
        }

        log::info!(
            "Refresh log sweep done: {} ok, {} failed, {} abandoned",
            report.succeeded,
            report.failed,
            report.abandoned
        );
        Ok(report)
    }

    /// Drive `work` while renewing the sweep lease.
    ///
    /// Returns `None`, dropping `work`, as soon as a renewal finds the lease
    /// held by someone else.
    async fn while_leased<Fut>(&self, lease: &LeaseGuard, work: Fut) -> Result<Option<Result<()>>>
    where
        Fut: Future<Output = Result<()>>,
    {
        let ttl = self.policy.lease_ttl;
        let mut heartbeat = tokio::time::interval((ttl / 3).max(Duration::from_millis(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        heartbeat.tick().await;

        tokio::pin!(work);
        loop {
            tokio::select! {
                outcome = &mut work => return Ok(Some(outcome)),
                _ = heartbeat.tick() => {
                    if !lease.renew(ttl)? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Send the one-time follow-up for an entity if it is due.
    ///
    /// The flag is claimed in the store before `sender` is called, so at most
    /// one send ever happens per entity even when several callers race. A
    /// failed send is reported and not retried.
    pub async fn maybe_follow_up<S>(
        &self,
        external_id: &str,
        resolved_contact: &str,
        sender: &S,
        context: &FollowUpContext,
    ) -> Result<FollowUpOutcome>
    where
        S: FollowUpSender + ?Sized,
    {
        let contact = resolved_contact.trim();
        if contact.is_empty() {
            return Ok(FollowUpOutcome::NoContact);
        }

        let claimed = self.claim_follow_up(external_id, contact)?;
        if claimed != FollowUpOutcome::Sent {
            log::debug!("Follow-up for {} not sent: {:?}", external_id, claimed);
            return Ok(claimed);
        }

        match sender.send_follow_up(contact, context).await {
            Ok(()) => {
                log::info!("Follow-up sent for {}", external_id);
                Ok(FollowUpOutcome::Sent)
            }
            Err(e) => {
                log::error!("Follow-up delivery for {} failed: {}", external_id, e);
                Err(Error::FollowUp(format!("{}: {}", external_id, e)))
            }
        }
    }

    pub fn stats(&self) -> Result<RefreshLogStats> {
        let conn = self.db.lock()?;
        let counts: [i64; 5] = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(processed_at IS NULL), 0),
                        COALESCE(SUM(processed_at IS NOT NULL), 0),
                        COALESCE(SUM(follow_up_sent), 0),
                        COUNT(DISTINCT CASE WHEN processed_at IS NULL
                                            THEN entity_external_id END)
                 FROM refresh_log",
                [],
                |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?]),
            )
            .map_err(StoreError::from)?;

        let [total, pending, processed, follow_ups_sent, distinct_pending] =
            counts.map(|n| n as usize);
        Ok(RefreshLogStats {
            total,
            pending,
            processed,
            follow_ups_sent,
            distinct_pending,
        })
    }

    /// Pending entity ids old enough to sweep, each with its highest entry id.
    ///
    /// Ids whose oldest pending request came first are served first. Entries
    /// recorded after this read stay pending for the next sweep.
    fn pending_groups(&self) -> Result<Vec<(String, i64)>> {
        let cutoff = now_millis().saturating_sub(duration_millis(self.policy.min_age));
        let limit = i64::try_from(self.policy.batch_limit).unwrap_or(i64::MAX);
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_external_id, MAX(id) FROM refresh_log
                 WHERE processed_at IS NULL AND requested_at <= ?1
                 GROUP BY entity_external_id
                 ORDER BY MIN(id)
                 LIMIT ?2",
            )
            .map_err(StoreError::from)?;
        let groups = stmt
            .query_map(params![cutoff, limit], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        Ok(groups)
    }

    fn close_group(&self, external_id: &str, up_to: i64) -> Result<usize> {
        let conn = self.db.lock()?;
        let closed = conn
            .execute(
                "UPDATE refresh_log SET processed_at = ?3
                 WHERE entity_external_id = ?1 AND id <= ?2 AND processed_at IS NULL",
                params![external_id, up_to, now_millis()],
            )
            .map_err(StoreError::from)?;
        Ok(closed)
    }

    /// Count a failed attempt; returns how many entries were closed for good
    fn record_failure(&self, external_id: &str, up_to: i64, error: &str) -> Result<usize> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE refresh_log
             SET attempts = attempts + 1, last_error = ?3
             WHERE entity_external_id = ?1 AND id <= ?2 AND processed_at IS NULL",
            params![external_id, up_to, error],
        )
        .map_err(StoreError::from)?;

        let closed = conn
            .execute(
                "UPDATE refresh_log SET processed_at = ?4
                 WHERE entity_external_id = ?1 AND id <= ?2 AND processed_at IS NULL
                   AND attempts >= ?3",
                params![external_id, up_to, self.policy.max_attempts, now_millis()],
            )
            .map_err(StoreError::from)?;
        Ok(closed)
    }

    /// Atomically check and set the follow-up flag on the newest entry
    fn claim_follow_up(&self, external_id: &str, contact: &str) -> Result<FollowUpOutcome> {
        let mut conn = self.db.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let already: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM refresh_log
                               WHERE entity_external_id = ?1 AND follow_up_sent = 1)",
                [external_id],
                |r| r.get(0),
            )
            .map_err(StoreError::from)?;
        if already {
            return Ok(FollowUpOutcome::AlreadySent);
        }

        let newest: Option<i64> = tx
            .query_row(
                "SELECT id FROM refresh_log WHERE entity_external_id = ?1
                 ORDER BY requested_at DESC, id DESC LIMIT 1",
                [external_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        let Some(entry_id) = newest else {
            return Ok(FollowUpOutcome::NotRequested);
        };

        tx.execute(
            "UPDATE refresh_log SET follow_up_sent = 1, resolved_contact = ?2 WHERE id = ?1",
            params![entry_id, contact],
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(FollowUpOutcome::Sent)
    }
}

const ENTRY_COLUMNS: &str = "id, entity_external_id, requested_at, processed_at, \
     follow_up_sent, resolved_contact, attempts, last_error";

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshLogEntry> {
    Ok(RefreshLogEntry {
        id: row.get(0)?,
        entity_external_id: row.get(1)?,
        requested_at: from_millis(row.get(2)?),
        processed_at: row.get::<_, Option<i64>>(3)?.map(from_millis),
        follow_up_sent: row.get(4)?,
        resolved_contact: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
    })
}

fn load_entry(
    conn: &Connection,
    id: i64,
) -> std::result::Result<Option<RefreshLogEntry>, StoreError> {
    let sql = format!("SELECT {} FROM refresh_log WHERE id = ?1", ENTRY_COLUMNS);
    Ok(conn.query_row(&sql, [id], entry_from_row).optional()?)
}
