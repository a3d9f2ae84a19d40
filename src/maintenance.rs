//! Periodic upkeep of the mirror
//!
//! One maintenance cycle demotes expired records, drops expired query results,
//! eagerly refreshes followed entities and sweeps the refresh request log,
//! sending owner follow-ups as it goes. Each task runs even when an earlier
//! one failed; the report says which ones did.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
    PriorityRefresher, QueryCacheStats, QueryResultCache, TtlCacheManager, TtlPolicy,
};
use crate::client::{CatalogProvider, FollowGraph, FollowUpContext, FollowUpSender};
use crate::error::{Error, Result};
use crate::refresh_log::{RefreshLog, RefreshLogStats, SweepReport};
use crate::signal::{InvalidationSignal, SignalSnapshot};
use crate::store::{EntityStats, EntityStore};

/// Point-in-time counts across every table of the mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorStats {
    pub entities: EntityStats,
    pub queries: QueryCacheStats,
    pub refresh_log: RefreshLogStats,
    pub signal: SignalSnapshot,
}

impl MirrorStats {
    pub fn collect(
        store: &EntityStore,
        queries: &QueryResultCache,
        log: &RefreshLog,
        signal: &InvalidationSignal,
    ) -> Result<Self> {
        Ok(Self {
            entities: store.stats()?,
            queries: queries.stats()?,
            refresh_log: log.stats()?,
            signal: signal.snapshot()?,
        })
    }
}

/// Drains the refresh request log.
///
/// Each distinct requested id is refetched strictly (an upstream failure
/// fails that id's batch), then its owner gets the one-time follow-up if the
/// fresh payload names a contact.
#[derive(Clone)]
pub struct RefreshSweeper {
    manager: TtlCacheManager,
    log: RefreshLog,
    ttl: TtlPolicy,
    provider: Arc<dyn CatalogProvider>,
    sender: Arc<dyn FollowUpSender>,
}

impl RefreshSweeper {
    pub fn new(
        manager: TtlCacheManager,
        log: RefreshLog,
        ttl: TtlPolicy,
        provider: Arc<dyn CatalogProvider>,
        sender: Arc<dyn FollowUpSender>,
    ) -> Self {
        Self {
            manager,
            log,
            ttl,
            provider,
            sender,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.log
            .sweep_unprocessed(move |external_id| self.refresh_one(external_id))
            .await
    }

    async fn refresh_one(&self, external_id: String) -> Result<()> {
        // Kind is unknown until upstream answers for ids never mirrored
        let ttl = match self.manager.store().find_by_external_id(&external_id)? {
            Some(existing) => self.ttl.for_kind(existing.kind),
            None => self.ttl.show.min(self.ttl.episode),
        };

        let entity = self
            .manager
            .force_refresh(self.provider.as_ref(), &external_id, ttl)
            .await?;

        let Some(contact) = entity.payload.contact() else {
            log::debug!("No owner contact for {}, skipping follow-up", external_id);
            return Ok(());
        };

        let context = FollowUpContext {
            external_id: external_id.clone(),
            title: entity.payload.title.clone(),
            request_count: self.log.entries_for(&external_id)?.len(),
        };

        match self
            .log
            .maybe_follow_up(&external_id, contact, self.sender.as_ref(), &context)
            .await
        {
            Ok(outcome) => {
                log::debug!("Follow-up for {}: {:?}", external_id, outcome);
                Ok(())
            }
            // Refresh itself succeeded; the claim already prevents a resend
            Err(Error::FollowUp(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Outcome of one named task within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    fn from_result<T: Serialize>(task: &'static str, result: Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                task,
                success: true,
                summary: serde_json::to_value(value).ok(),
                error: None,
            },
            Err(e) => {
                log::warn!("Maintenance task {} failed: {}", task, e);
                Self {
                    task,
                    success: false,
                    summary: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<MirrorStats>,
    pub tasks: Vec<TaskResult>,
    #[serde(rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<MirrorStats>,
}

impl MaintenanceReport {
    pub fn success(&self) -> bool {
        self.tasks.iter().all(|t| t.success)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    pub entities_demoted: usize,
    pub queries_purged: usize,
}

pub struct Maintenance {
    store: EntityStore,
    queries: QueryResultCache,
    log: RefreshLog,
    signal: InvalidationSignal,
    priority: PriorityRefresher,
    sweeper: RefreshSweeper,
    provider: Arc<dyn CatalogProvider>,
    graph: Arc<dyn FollowGraph>,
}

impl Maintenance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: EntityStore,
        queries: QueryResultCache,
        log: RefreshLog,
        signal: InvalidationSignal,
        priority: PriorityRefresher,
        sweeper: RefreshSweeper,
        provider: Arc<dyn CatalogProvider>,
        graph: Arc<dyn FollowGraph>,
    ) -> Self {
        Self {
            store,
            queries,
            log,
            signal,
            priority,
            sweeper,
            provider,
            graph,
        }
    }

    fn stats(&self) -> Option<MirrorStats> {
        match MirrorStats::collect(&self.store, &self.queries, &self.log, &self.signal) {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Failed to collect mirror stats: {}", e);
                None
            }
        }
    }

    fn expire(&self) -> Result<ExpirySummary> {
        Ok(ExpirySummary {
            entities_demoted: self.store.demote_expired()?,
            queries_purged: self.queries.purge_expired()?,
        })
    }

    /// Run every maintenance task once
    pub async fn run_cycle(&self) -> MaintenanceReport {
        let started_at = Utc::now();
        log::info!("Starting maintenance cycle");

        let initial = self.stats();
        let mut tasks = Vec::with_capacity(3);

        tasks.push(TaskResult::from_result("expire", self.expire()));

        let priority = self
            .priority
            .refresh_followed(self.provider.as_ref(), self.graph.as_ref())
            .await;
        tasks.push(TaskResult::from_result("priority_refresh", priority));

        tasks.push(TaskResult::from_result(
            "refresh_log_sweep",
            self.sweeper.sweep().await,
        ));

        let report = MaintenanceReport {
            started_at,
            finished_at: Utc::now(),
            initial,
            tasks,
            final_stats: self.stats(),
        };

        let failed = report.tasks.iter().filter(|t| !t.success).count();
        if failed == 0 {
            log::info!(
                "Maintenance cycle done in {}ms",
                (report.finished_at - started_at).num_milliseconds()
            );
        } else {
            log::warn!("Maintenance cycle done with {} failed tasks", failed);
        }
        report
    }

    /// Repeat cycles every `interval` until Ctrl-C.
    ///
    /// A cycle that overruns the interval delays the next one instead of
    /// queueing catch-up runs. `on_report` sees every finished cycle.
    pub async fn run_every<F>(&self, interval: Duration, mut on_report: F) -> Result<usize>
    where
        F: FnMut(&MaintenanceReport),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    cycles += 1;
                    on_report(&report);
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    log::info!("Interrupted, stopping after {} cycles", cycles);
                    return Ok(cycles);
                }
            }
        }
    }
}
