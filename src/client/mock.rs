//! Mock collaborators for testing
//!
//! In-memory stand-ins for the catalog provider and follow-up channel that
//! count their calls, so tests can assert exactly how often upstream was hit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CatalogItem, CatalogProvider, FollowUpContext, FollowUpSender};
use crate::cache::{ResultSet, SearchParams};
use crate::error::UpstreamError;
use crate::store::CatalogPayload;

/// Mock catalog provider.
///
/// Configure entities via builder methods, then use in tests.
///
/// # Example
/// ```ignore
/// let mock = MockCatalogProvider::new()
///     .with_entity("show-1", CatalogPayload::show("Hard Fork"));
///
/// let payload = mock.fetch_catalog_entity("show-1").await?;
/// assert_eq!(mock.fetch_count("show-1"), 1);
/// ```
#[derive(Default)]
pub struct MockCatalogProvider {
    entities: Mutex<HashMap<String, CatalogPayload>>,
    search_results: Mutex<Vec<CatalogItem>>,
    failure: Mutex<Option<UpstreamError>>,
    delay: Option<Duration>,
    fetches: Mutex<HashMap<String, usize>>,
    searches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCatalogProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, external_id: impl Into<String>, payload: CatalogPayload) -> Self {
        self.set_entity(external_id, payload);
        self
    }

    pub fn with_search_results(self, items: Vec<CatalogItem>) -> Self {
        if let Ok(mut results) = self.search_results.lock() {
            *results = items;
        }
        self
    }

    /// Delay every call, to exercise timeouts and concurrency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_entity(&self, external_id: impl Into<String>, payload: CatalogPayload) {
        if let Ok(mut entities) = self.entities.lock() {
            entities.insert(external_id.into(), payload);
        }
    }

    /// Make every following call fail with `err`
    pub fn fail_with(&self, err: UpstreamError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(err);
        }
    }

    pub fn recover(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    pub fn fetch_count(&self, external_id: &str) -> usize {
        self.fetches
            .lock()
            .map(|f| f.get(external_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches
            .lock()
            .map(|f| f.values().sum())
            .unwrap_or(0)
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> std::result::Result<(), UpstreamError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failure.lock().ok().and_then(|f| (*f).clone());
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CatalogProvider for MockCatalogProvider {
    async fn fetch_catalog_entity(
        &self,
        external_id: &str,
    ) -> std::result::Result<CatalogPayload, UpstreamError> {
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(external_id.to_string()).or_insert(0) += 1;
        }
        self.enter().await?;

        self.entities
            .lock()
            .ok()
            .and_then(|e| e.get(external_id).cloned())
            .ok_or_else(|| UpstreamError::NotFound(external_id.to_string()))
    }

    async fn search(
        &self,
        params: &SearchParams,
    ) -> std::result::Result<ResultSet<CatalogItem>, UpstreamError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        let all = self
            .search_results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();
        let total = all.len();
        let items = all
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .collect();
        Ok(ResultSet::new(items, total, params.offset, params.limit))
    }
}

/// Follow-up sender that records what it was asked to send
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, FollowUpContext)>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingSender {
    /// A sender whose every delivery fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, FollowUpContext)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FollowUpSender for RecordingSender {
    async fn send_follow_up(
        &self,
        contact: &str,
        context: &FollowUpContext,
    ) -> std::result::Result<(), UpstreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(UpstreamError::ServerError("delivery failed".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((contact.to_string(), context.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_fetches() {
        let mock = MockCatalogProvider::new().with_entity("a", CatalogPayload::show("A"));
        mock.fetch_catalog_entity("a").await.unwrap();
        mock.fetch_catalog_entity("a").await.unwrap();
        assert!(mock.fetch_catalog_entity("missing").await.is_err());

        assert_eq!(mock.fetch_count("a"), 2);
        assert_eq!(mock.total_fetches(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure_and_recovery() {
        let mock = MockCatalogProvider::new().with_entity("a", CatalogPayload::show("A"));
        mock.fail_with(UpstreamError::Timeout);
        assert!(matches!(
            mock.fetch_catalog_entity("a").await,
            Err(UpstreamError::Timeout)
        ));

        mock.recover();
        assert!(mock.fetch_catalog_entity("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_search_pages() {
        let items = (0..5)
            .map(|i| CatalogItem {
                external_id: format!("show-{}", i),
                payload: CatalogPayload::show(format!("Show {}", i)),
            })
            .collect();
        let mock = MockCatalogProvider::new().with_search_results(items);

        let page = mock
            .search(&SearchParams::new("show").page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].external_id, "show-2");
    }
}
