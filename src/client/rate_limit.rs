//! Per-endpoint rate limiting for the catalog provider
//!
//! Implements reactive rate limiting that only activates after receiving a 429.
//! Search is metered more tightly than single-entity lookups.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use tokio::sync::RwLock;

/// Categories of provider endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    /// GET /catalog/{id}
    Lookup,
    /// GET /search
    Search,
}

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 2] = [EndpointCategory::Lookup, EndpointCategory::Search];

    /// Categorize a request path (without the base URL)
    pub fn from_path(path: &str) -> Self {
        let path = path.split('?').next().unwrap_or(path);
        if path == "/search" || path.starts_with("/search/") {
            EndpointCategory::Search
        } else {
            EndpointCategory::Lookup
        }
    }

    /// Requests per second for this category, given the configured base rate
    pub fn rate_limit(&self, base_per_second: u32) -> f64 {
        match self {
            EndpointCategory::Lookup => f64::from(base_per_second),
            EndpointCategory::Search => f64::from(base_per_second) / 2.0,
        }
    }
}

/// Rate limiter state for a single endpoint category.
pub struct EndpointRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    active: AtomicBool,
    category: EndpointCategory,
}

impl EndpointRateLimiter {
    pub fn new(category: EndpointCategory, base_per_second: u32) -> Self {
        let rate = category.rate_limit(base_per_second);

        // Handle sub-1 rates by using per-minute quotas
        let quota = if rate >= 1.0 {
            Quota::per_second(NonZeroU32::new(rate as u32).unwrap_or(NonZeroU32::MIN))
        } else {
            let per_min = (rate * 60.0).round() as u32;
            Quota::per_minute(NonZeroU32::new(per_min).unwrap_or(NonZeroU32::MIN))
        };

        Self {
            limiter: RateLimiter::direct(quota),
            active: AtomicBool::new(false),
            category,
        }
    }

    /// Activate rate limiting for this category.
    pub fn activate(&self) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if !was_active {
            debug!("Rate limiting activated for {:?}", self.category);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for permission if rate limiting is active.
    pub async fn wait_if_active(&self) {
        if self.is_active() {
            debug!("Waiting for rate limiter {:?}", self.category);
            self.limiter.until_ready().await;
        }
    }
}

/// Collection of rate limiters for all endpoint categories.
pub struct RateLimiterSet {
    limiters: RwLock<HashMap<EndpointCategory, EndpointRateLimiter>>,
}

impl RateLimiterSet {
    pub fn new(base_per_second: u32) -> Self {
        let map = EndpointCategory::ALL
            .into_iter()
            .map(|category| (category, EndpointRateLimiter::new(category, base_per_second)))
            .collect();

        Self {
            limiters: RwLock::new(map),
        }
    }

    /// Wait for rate limit permission for a category (if active).
    pub async fn wait_for(&self, category: EndpointCategory) {
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(&category) {
            limiter.wait_if_active().await;
        }
    }

    /// Activate rate limiting for a category (called on 429).
    pub async fn activate(&self, category: EndpointCategory) {
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(&category) {
            limiter.activate();
        }
    }

    pub async fn is_active(&self, category: EndpointCategory) -> bool {
        let limiters = self.limiters.read().await;
        limiters.get(&category).is_some_and(|l| l.is_active())
    }
}
