//! Caching layers over the local store
//!
//! - [`manager`]: TTL cache for catalog entities with stale-while-revalidate
//! - [`priority`]: eager refresh of followed entities ahead of expiry
//! - [`query`]: expiry-only cache of computed search results
//! - [`backoff`]: per-id retry backoff after upstream failures

pub mod backoff;
pub mod key;
pub mod manager;
pub mod priority;
pub mod query;

use std::time::Duration;

use crate::store::EntityKind;

/// Default TTLs per data kind
pub struct CacheTtl;

impl CacheTtl {
    // Show metadata rarely changes
    pub const SHOW: Duration = Duration::from_secs(7 * 24 * 60 * 60); // 7 days

    // Episode lists move as shows publish
    pub const EPISODE: Duration = Duration::from_secs(6 * 60 * 60); // 6 hr

    // Search results are a short-lived dedup layer
    pub const SEARCH: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
}

/// TTLs in effect, usually loaded from config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub show: Duration,
    pub episode: Duration,
    pub search: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            show: CacheTtl::SHOW,
            episode: CacheTtl::EPISODE,
            search: CacheTtl::SEARCH,
        }
    }
}

impl TtlPolicy {
    pub fn for_kind(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Show => self.show,
            EntityKind::Episode => self.episode,
        }
    }
}

// Re-export main types
pub use backoff::{Backoff, FailureKind, FailureTracker};
pub use key::{QueryKey, SearchParams, SearchSort, cache_key, normalize_text};
pub use manager::{ResolveOutcome, Resolved, TtlCacheManager};
pub use priority::{PriorityRefresher, PriorityReport};
pub use query::{QueryCacheStats, QueryResultCache, ResultSet};
