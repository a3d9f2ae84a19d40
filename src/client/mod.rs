//! Upstream collaborators
//!
//! The mirror talks to three outside parties: the catalog provider it mirrors,
//! a notification channel for owner follow-ups, and whoever knows which
//! entities are followed. Each sits behind a trait so tests and alternative
//! backends can stand in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::cache::{ResultSet, SearchParams};
use crate::error::UpstreamError;
use crate::store::CatalogPayload;

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod notifier;
pub mod rate_limit;

pub use http::HttpCatalogProvider;
pub use notifier::{LogNotifier, WebhookNotifier};

/// Upstream catalog provider
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch the current payload for one show or episode
    async fn fetch_catalog_entity(
        &self,
        external_id: &str,
    ) -> std::result::Result<CatalogPayload, UpstreamError>;

    /// Run a catalog search
    async fn search(
        &self,
        params: &SearchParams,
    ) -> std::result::Result<ResultSet<CatalogItem>, UpstreamError>;
}

/// Delivery channel for the one-time owner follow-up
#[async_trait]
pub trait FollowUpSender: Send + Sync {
    async fn send_follow_up(
        &self,
        contact: &str,
        context: &FollowUpContext,
    ) -> std::result::Result<(), UpstreamError>;
}

/// Source of follow relationships, used only for priority refresh
#[async_trait]
pub trait FollowGraph: Send + Sync {
    async fn list_followed_external_ids(
        &self,
    ) -> std::result::Result<BTreeSet<String>, UpstreamError>;
}

/// A search hit: a catalog payload with its external id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub external_id: String,
    #[serde(flatten)]
    pub payload: CatalogPayload,
}

/// What a follow-up is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowUpContext {
    pub external_id: String,
    pub title: String,
    /// Refresh requests recorded for the entity when the follow-up fired
    pub request_count: usize,
}

/// Fixed set of followed ids, typically from config
#[derive(Debug, Clone, Default)]
pub struct StaticFollowGraph {
    ids: BTreeSet<String>,
}

impl StaticFollowGraph {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(Into::into)
                .filter(|id: &String| !id.trim().is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl FollowGraph for StaticFollowGraph {
    async fn list_followed_external_ids(
        &self,
    ) -> std::result::Result<BTreeSet<String>, UpstreamError> {
        Ok(self.ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_follow_graph_dedups_and_drops_blank() {
        let graph = StaticFollowGraph::new(["a", "b", "a", "  "]);
        let ids = graph.list_followed_external_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a"));
        assert!(ids.contains("b"));
    }

    #[test]
    fn test_catalog_item_flattens_payload() {
        let json = r#"{"external_id":"show-1","kind":"show","title":"Hard Fork"}"#;
        let item: CatalogItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.external_id, "show-1");
        assert_eq!(item.payload.title, "Hard Fork");
        assert!(item.payload.extra.is_empty());
    }
}
