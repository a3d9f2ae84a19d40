//! Eager refresh for followed entities
//!
//! Entities someone follows are refreshed shortly before they expire, even
//! without a read. Everything else is refreshed lazily by reads, so entities
//! nobody follows never spend upstream quota here.

use futures::stream::{FuturesUnordered, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::TtlPolicy;
use super::manager::TtlCacheManager;
use crate::client::{CatalogProvider, FollowGraph};
use crate::error::Result;
use crate::store::CatalogEntity;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityReport {
    pub followed: usize,
    pub due: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Due, but upstream is backing off for them
    pub deferred: usize,
}

pub struct PriorityRefresher {
    manager: TtlCacheManager,
    ttl: TtlPolicy,
    lead_window: Duration,
    concurrency: usize,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl PriorityRefresher {
    /// `per_minute` caps upstream calls made by eager refresh
    pub fn new(
        manager: TtlCacheManager,
        ttl: TtlPolicy,
        lead_window: Duration,
        per_minute: u32,
        concurrency: usize,
    ) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            manager,
            ttl,
            lead_window,
            concurrency: concurrency.max(1),
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Refresh followed entities that expire within the lead window
    pub async fn refresh_followed<P, G>(&self, provider: &P, graph: &G) -> Result<PriorityReport>
    where
        P: CatalogProvider + ?Sized,
        G: FollowGraph + ?Sized,
    {
        let followed = graph.list_followed_external_ids().await?;
        let due = self
            .manager
            .store()
            .due_for_refresh(&followed, self.lead_window)?;

        let mut report = PriorityReport {
            followed: followed.len(),
            due: due.len(),
            ..PriorityReport::default()
        };

        let mut ready = Vec::with_capacity(due.len());
        for entity in due {
            let backing_off = match entity.external_id.as_deref() {
                Some(id) => self.manager.failures().is_backing_off(id)?,
                None => true,
            };
            if backing_off {
                report.deferred += 1;
            } else {
                ready.push(entity);
            }
        }

        if ready.is_empty() {
            log::debug!("No followed entities due for refresh");
            return Ok(report);
        }

        log::info!(
            "Priority refresh of {} followed entities (max {} concurrent)",
            ready.len(),
            self.concurrency
        );

        let refresh_one = |entity: CatalogEntity| async move {
            let external_id = entity.external_id.unwrap_or_default();
            self.limiter.until_ready().await;
            let ttl = self.ttl.for_kind(entity.kind);
            let result = self.manager.force_refresh(provider, &external_id, ttl).await;
            (external_id, result)
        };

        let mut pending = ready.into_iter();
        let mut in_flight = FuturesUnordered::new();

        // Seed initial batch up to the concurrency limit
        for entity in pending.by_ref().take(self.concurrency) {
            in_flight.push(refresh_one(entity));
        }

        while let Some((external_id, result)) = in_flight.next().await {
            match result {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Priority refresh of {} failed: {}", external_id, e);
                }
            }
            if let Some(next) = pending.next() {
                in_flight.push(refresh_one(next));
            }
        }

        log::info!(
            "Priority refresh done: {} refreshed, {} failed, {} deferred",
            report.refreshed,
            report.failed,
            report.deferred
        );
        Ok(report)
    }
}
