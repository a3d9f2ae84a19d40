//! Query cache keys from canonicalized parameters

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalize free-text query input: trimmed, lowercased, single-spaced.
///
/// "  Hard   FORK " and "hard fork" address the same cache entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate a deterministic cache key from a scope and parameters.
///
/// The key is a SHA-256 hash of the scope and the sorted parameters, so the
/// order callers pass parameters in never matters. Empty values are dropped;
/// an absent filter and an empty one mean the same query.
pub fn cache_key(scope: &str, params: &[(&str, &str)]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(scope.as_bytes());
    hasher.update(b"|");

    let mut sorted_params: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted_params.sort_by_key(|(k, _)| *k);

    for (k, v) in sorted_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }

    format!("{:x}", hasher.finalize())
}

/// A canonical query-cache key with the scope it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub scope: String,
    pub digest: String,
}

impl QueryKey {
    pub fn new(scope: &str, params: &[(&str, &str)]) -> Self {
        Self {
            scope: scope.to_string(),
            digest: cache_key(scope, params),
        }
    }
}

/// How search results are ordered upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    #[default]
    Relevance,
    Recent,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Relevance => "relevance",
            SearchSort::Recent => "recent",
        }
    }
}

/// Catalog search parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre_id: Option<u32>,
    #[serde(default)]
    pub sort_by: SearchSort,
    #[serde(default)]
    pub offset: usize,
    pub limit: usize,
}

impl SearchParams {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            genre_id: None,
            sort_by: SearchSort::default(),
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn genre(mut self, genre_id: u32) -> Self {
        self.genre_id = Some(genre_id);
        self
    }

    pub fn sort_by(mut self, sort: SearchSort) -> Self {
        self.sort_by = sort;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Canonical query cache key for these parameters
    pub fn cache_key(&self) -> QueryKey {
        let query = normalize_text(&self.query);
        let genre = self.genre_id.map(|g| g.to_string()).unwrap_or_default();
        let offset = self.offset.to_string();
        let limit = self.limit.to_string();
        QueryKey::new(
            "search",
            &[
                ("q", &query),
                ("genre_id", &genre),
                ("sort_by", self.sort_by.as_str()),
                ("offset", &offset),
                ("limit", &limit),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_deterministic() {
        let key1 = cache_key("search", &[("limit", "10"), ("offset", "0")]);
        let key2 = cache_key("search", &[("offset", "0"), ("limit", "10")]);

        // Same inputs in different order should produce same key
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_cache_key_different_scopes() {
        let key1 = cache_key("search", &[("q", "news")]);
        let key2 = cache_key("episodes", &[("q", "news")]);

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_cache_key_ignores_empty_values() {
        let key1 = cache_key("search", &[("q", "news"), ("genre_id", "")]);
        let key2 = cache_key("search", &[("q", "news")]);

        assert_eq!(key1, key2);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hard   FORK "), "hard fork");
        assert_eq!(normalize_text("\tdaily\nnews"), "daily news");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_search_key_normalizes_query() {
        let a = SearchParams::new("Tech  News").cache_key();
        let b = SearchParams::new(" tech news").cache_key();
        assert_eq!(a, b);
        assert_eq!(a.scope, "search");
    }

    #[test]
    fn test_search_key_distinguishes_filters_and_pages() {
        let base = SearchParams::new("tech");
        assert_ne!(base.cache_key(), base.clone().genre(127).cache_key());
        assert_ne!(base.cache_key(), base.clone().page(10, 10).cache_key());
        assert_ne!(
            base.cache_key(),
            base.clone().sort_by(SearchSort::Recent).cache_key()
        );
    }
}
