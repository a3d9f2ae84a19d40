//! TTL cache manager for catalog entities
//!
//! Decides hit, stale or miss for a lookup and orchestrates the refetch.
//! Permanent (owned) records bypass TTL entirely. An expired record whose
//! refresh fails is served stale, and the failure puts the id into a bounded
//! backoff so an outage does not turn every read into an upstream call.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use super::backoff::{FailureKind, FailureTracker};
use crate::client::CatalogProvider;
use crate::error::{Error, Result, UpstreamError};
use crate::store::{CatalogEntity, CatalogPayload, EntityKind, EntityStore};

/// How a resolved entity was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Owned record; TTL does not apply
    Permanent,
    /// Cached and within TTL
    Fresh,
    /// Fetched from upstream just now
    Fetched,
    /// Expired, refresh failed or is backing off; previous record served
    StaleFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    pub entity: CatalogEntity,
    pub outcome: ResolveOutcome,
}

#[derive(Clone)]
pub struct TtlCacheManager {
    store: EntityStore,
    failures: FailureTracker,
    fetch_timeout: Duration,
}

impl TtlCacheManager {
    pub fn new(store: EntityStore, failures: FailureTracker, fetch_timeout: Duration) -> Self {
        Self {
            store,
            failures,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Resolve an entity, fetching through `fetch` on a miss or expiry.
    ///
    /// Concurrent resolves of the same id may both fetch; the upsert converges
    /// either way.
    pub async fn resolve<F, Fut>(
        &self,
        external_id: &str,
        fetch: F,
        ttl: Duration,
    ) -> Result<Resolved>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<CatalogPayload, UpstreamError>>,
    {
        let existing = self.store.find_by_external_id(external_id)?;
        let now = Utc::now();

        let stale = match existing {
            Some(entity) if entity.owner_kind.is_owned() || entity.is_permanent() => {
                log::debug!("Cache bypass (permanent): {}", external_id);
                return Ok(Resolved {
                    entity,
                    outcome: ResolveOutcome::Permanent,
                });
            }
            Some(entity) if entity.is_fresh(now, ttl) => {
                log::debug!("Cache hit: {}", external_id);
                return Ok(Resolved {
                    entity,
                    outcome: ResolveOutcome::Fresh,
                });
            }
            Some(entity) => entity,
            None => {
                log::debug!("Cache miss: {}", external_id);
                let entity = self.fetch_and_store(external_id, fetch, ttl, true).await?;
                return Ok(Resolved {
                    entity,
                    outcome: ResolveOutcome::Fetched,
                });
            }
        };

        log::debug!("Cache expired: {}", external_id);
        if let Some(backoff) = self.failures.backoff(external_id)? {
            log::warn!(
                "Serving stale {} (upstream backing off for {:?})",
                external_id,
                backoff.retry_in
            );
            return Ok(Resolved {
                entity: stale,
                outcome: ResolveOutcome::StaleFallback,
            });
        }

        match self.fetch_and_store(external_id, fetch, ttl, false).await {
            Ok(entity) => Ok(Resolved {
                entity,
                outcome: ResolveOutcome::Fetched,
            }),
            Err(e) if is_upstream_failure(&e) => {
                log::warn!("Serving stale {} after refresh failure: {}", external_id, e);
                Ok(Resolved {
                    entity: stale,
                    outcome: ResolveOutcome::StaleFallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve through a catalog provider
    pub async fn resolve_with<P>(&self, provider: &P, external_id: &str, ttl: Duration) -> Result<Resolved>
    where
        P: CatalogProvider + ?Sized,
    {
        self.resolve(
            external_id,
            |id| async move { provider.fetch_catalog_entity(&id).await },
            ttl,
        )
        .await
    }

    /// Refetch unconditionally and fail hard if upstream does.
    ///
    /// For callers that must not act on stale data. Backoff is ignored, but
    /// the outcome still feeds it.
    pub async fn force_refresh<P>(
        &self,
        provider: &P,
        external_id: &str,
        ttl: Duration,
    ) -> Result<CatalogEntity>
    where
        P: CatalogProvider + ?Sized,
    {
        self.fetch_and_store(
            external_id,
            |id| async move { provider.fetch_catalog_entity(&id).await },
            ttl,
            false,
        )
        .await
    }

    async fn fetch_and_store<F, Fut>(
        &self,
        external_id: &str,
        fetch: F,
        ttl: Duration,
        honor_backoff: bool,
    ) -> Result<CatalogEntity>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = std::result::Result<CatalogPayload, UpstreamError>>,
    {
        if honor_backoff {
            if let Some(backoff) = self.failures.backoff(external_id)? {
                return Err(match backoff.last {
                    FailureKind::NotFound => Error::NotFound(external_id.to_string()),
                    FailureKind::Unavailable => Error::UpstreamUnavailable {
                        external_id: external_id.to_string(),
                        reason: format!("backing off for {}s", backoff.retry_in.as_secs().max(1)),
                    },
                });
            }
        }

        let fetched = tokio::time::timeout(self.fetch_timeout, fetch(external_id.to_string())).await;
        let payload = match fetched {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                let kind = match &e {
                    UpstreamError::NotFound(_) => FailureKind::NotFound,
                    _ => FailureKind::Unavailable,
                };
                self.failures.record_failure(external_id, kind)?;
                return Err(self.upstream_error(external_id, e));
            }
            Err(_) => {
                self.failures
                    .record_failure(external_id, FailureKind::Unavailable)?;
                return Err(Error::Timeout {
                    external_id: external_id.to_string(),
                    after: self.fetch_timeout,
                });
            }
        };

        // Upstream is healthy here; the caller has to mirror the show first
        if let Some(parent) = self.unmirrored_parent(&payload)? {
            return Err(Error::Validation(format!(
                "parent show {} of {} is not mirrored",
                parent, external_id
            )));
        }

        match self.store.upsert(external_id, &payload, ttl) {
            Ok(entity) => {
                self.failures.record_success(external_id)?;
                Ok(entity)
            }
            Err(Error::Validation(reason)) => {
                // Upstream handed back something the store refuses
                self.failures
                    .record_failure(external_id, FailureKind::Unavailable)?;
                Err(Error::UpstreamUnavailable {
                    external_id: external_id.to_string(),
                    reason: format!("invalid payload: {}", reason),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Parent show an episode payload points at, when it is not in the store
    fn unmirrored_parent<'a>(&self, payload: &'a CatalogPayload) -> Result<Option<&'a str>> {
        let parent = match (payload.kind, payload.parent_external_id.as_deref()) {
            (EntityKind::Episode, Some(parent)) if !parent.trim().is_empty() => parent,
            _ => return Ok(None),
        };
        Ok(self
            .store
            .find_by_external_id(parent)?
            .is_none()
            .then_some(parent))
    }

    fn upstream_error(&self, external_id: &str, err: UpstreamError) -> Error {
        match err {
            UpstreamError::NotFound(_) => Error::NotFound(external_id.to_string()),
            UpstreamError::Timeout => Error::Timeout {
                external_id: external_id.to_string(),
                after: self.fetch_timeout,
            },
            other => Error::UpstreamUnavailable {
                external_id: external_id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn is_upstream_failure(err: &Error) -> bool {
    matches!(
        err,
        Error::UpstreamUnavailable { .. } | Error::Timeout { .. } | Error::NotFound(_)
    )
}
