//! Expiry-only cache for computed query results
//!
//! Entries are whole result pages keyed by canonical parameters. An expired
//! entry is recomputed in full; nothing is patched and nothing is permanent.

use rusqlite::{OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::key::QueryKey;
use crate::error::{Result, StoreError};
use crate::store::{Database, duration_millis, now_millis};

/// One page of results with the pagination contract of its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet<T> {
    pub items: Vec<T>,
    /// Total matches upstream, across all pages
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> ResultSet<T> {
    pub fn new(items: Vec<T>, total: usize, offset: usize, limit: usize) -> Self {
        Self {
            items,
            total,
            offset,
            limit,
        }
    }

    pub fn empty(offset: usize, limit: usize) -> Self {
        Self::new(Vec::new(), 0, offset, limit)
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryCacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}

#[derive(Clone)]
pub struct QueryResultCache {
    db: Database,
}

impl QueryResultCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the cached page for `key`, or compute, store and return it.
    ///
    /// A failed compute is propagated and nothing is stored. Callers get the
    /// same `ResultSet` either way; only latency tells a hit from a miss.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &QueryKey,
        compute: F,
        ttl: Duration,
    ) -> Result<ResultSet<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResultSet<T>>>,
    {
        if let Some(hit) = self.lookup::<T>(key)? {
            log::debug!("Query cache hit: {} {}", key.scope, &key.digest[..8]);
            return Ok(hit);
        }

        log::debug!("Query cache miss: {} {}", key.scope, &key.digest[..8]);
        let result = compute().await?;
        if !ttl.is_zero() {
            self.store(key, &result, ttl)?;
        }
        Ok(result)
    }

    /// Drop one entry; returns whether it existed
    pub fn invalidate(&self, key: &QueryKey) -> Result<bool> {
        let conn = self.db.lock()?;
        let deleted = conn
            .execute("DELETE FROM query_cache WHERE cache_key = ?1", [&key.digest])
            .map_err(StoreError::from)?;
        Ok(deleted > 0)
    }

    /// Delete every expired entry
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM query_cache WHERE expires_at <= ?1",
                [now_millis()],
            )
            .map_err(StoreError::from)?;
        if purged > 0 {
            log::debug!("Purged {} expired query cache entries", purged);
        }
        Ok(purged)
    }

    /// Clear all cache entries
    pub fn clear(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let removed = conn
            .execute("DELETE FROM query_cache", [])
            .map_err(StoreError::from)?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<QueryCacheStats> {
        let conn = self.db.lock()?;
        let now = now_millis();

        let (total, valid, size, oldest, newest): (i64, i64, i64, Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(expires_at > ?1), 0),
                        COALESCE(SUM(size_bytes), 0),
                        MIN(CASE WHEN expires_at > ?1 THEN cached_at END),
                        MAX(CASE WHEN expires_at > ?1 THEN cached_at END)
                 FROM query_cache",
                [now],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .map_err(StoreError::from)?;

        Ok(QueryCacheStats {
            total_entries: total as usize,
            valid_entries: valid as usize,
            expired_entries: (total - valid) as usize,
            total_size_bytes: size as usize,
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }

    fn lookup<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<ResultSet<T>>> {
        let conn = self.db.lock()?;
        let cached: Option<String> = conn
            .query_row(
                "SELECT result FROM query_cache WHERE cache_key = ?1 AND expires_at > ?2",
                params![key.digest, now_millis()],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;

        let Some(json) = cached else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                log::warn!("Discarding unreadable query cache entry {}: {}", key.digest, e);
                conn.execute("DELETE FROM query_cache WHERE cache_key = ?1", [&key.digest])
                    .map_err(StoreError::from)?;
                Ok(None)
            }
        }
    }

    fn store<T: Serialize>(&self, key: &QueryKey, result: &ResultSet<T>, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let now = now_millis();
        let expires = now.saturating_add(duration_millis(ttl));

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO query_cache
             (cache_key, scope, result, cached_at, expires_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![key.digest, key.scope, json, now, expires, json.len()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::SearchParams;
    use crate::error::{Error, UpstreamError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> QueryResultCache {
        QueryResultCache::new(Database::open_in_memory().unwrap())
    }

    const TTL: Duration = Duration::from_secs(60);

    async fn compute_page(calls: &AtomicUsize) -> Result<ResultSet<String>> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResultSet::new(
            vec!["a".to_string(), "b".to_string()],
            5,
            0,
            2,
        ))
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cache = cache();
        let key = SearchParams::new("tech").cache_key();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(&key, || compute_page(&calls), TTL)
            .await
            .unwrap();
        let second = cache
            .get_or_compute(&key, || compute_page(&calls), TTL)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.total, 5);
        assert!(second.has_more());
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_an_entry() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(
                &SearchParams::new("Tech News").cache_key(),
                || compute_page(&calls),
                TTL,
            )
            .await
            .unwrap();
        cache
            .get_or_compute(
                &SearchParams::new("  tech   news ").cache_key(),
                || compute_page(&calls),
                TTL,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let cache = cache();
        let key = SearchParams::new("tech").cache_key();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(&key, || compute_page(&calls), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache
            .get_or_compute(&key, || compute_page(&calls), TTL)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_compute_stores_nothing() {
        let cache = cache();
        let key = SearchParams::new("tech").cache_key();

        let result: Result<ResultSet<String>> = cache
            .get_or_compute(
                &key,
                || async { Err(Error::Upstream(UpstreamError::Timeout)) },
                TTL,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(
                &SearchParams::new("old").cache_key(),
                || compute_page(&calls),
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        cache
            .get_or_compute(
                &SearchParams::new("new").cache_key(),
                || compute_page(&calls),
                TTL,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.valid_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert!(stats.total_size_bytes > 0);

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.purge_expired().unwrap(), 0);
        assert_eq!(cache.clear().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = cache();
        let key = SearchParams::new("tech").cache_key();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_compute(&key, || compute_page(&calls), TTL)
            .await
            .unwrap();
        assert!(cache.invalidate(&key).unwrap());
        cache
            .get_or_compute(&key, || compute_page(&calls), TTL)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
