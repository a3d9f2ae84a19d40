//! Command execution context
//!
//! Loads config, opens the store and wires the mirror components together so
//! handlers only deal with their own command.

use std::sync::Arc;

use crate::cache::{FailureTracker, PriorityRefresher, QueryResultCache, TtlCacheManager};
use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;
use crate::client::{
    CatalogProvider, FollowUpSender, HttpCatalogProvider, LogNotifier, StaticFollowGraph,
    WebhookNotifier,
};
use crate::config::Config;
use crate::error::Result;
use crate::maintenance::{Maintenance, MirrorStats, RefreshSweeper};
use crate::refresh_log::RefreshLog;
use crate::signal::InvalidationSignal;
use crate::store::{Database, EntityStore};

/// Everything a command needs: config, store handles and output format.
///
/// Upstream collaborators are built on demand, so commands that stay local
/// work without a provider configured.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub db: Database,
    pub store: EntityStore,
    pub signal: InvalidationSignal,
    pub queries: QueryResultCache,
    pub log: RefreshLog,
    pub manager: TtlCacheManager,
}

impl CommandContext {
    /// Load config and open the mirror.
    ///
    /// # Errors
    /// Returns error if config cannot be loaded or the store cannot be opened.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = Config::load(opts.config_ref())?;
        let db = match opts.data_dir_ref() {
            Some(dir) => Database::open_at(dir)?,
            None => Database::open()?,
        };
        Ok(Self::with_database(config, db, opts.format))
    }

    /// Wire the mirror around an already opened database
    pub fn with_database(config: Config, db: Database, format: OutputFormat) -> Self {
        let signal = InvalidationSignal::new(db.clone());
        let store = EntityStore::new(db.clone()).with_hook(Arc::new(signal.clone()));
        let (base, max) = config.backoff();
        let manager = TtlCacheManager::new(
            store.clone(),
            FailureTracker::new(db.clone(), base, max),
            config.fetch_timeout(),
        );

        Self {
            queries: QueryResultCache::new(db.clone()),
            log: RefreshLog::new(db.clone(), config.sweep_policy()),
            config,
            format,
            db,
            store,
            signal,
            manager,
        }
    }

    /// Catalog provider from config; errors if no provider URL is set
    pub fn provider(&self) -> Result<Arc<dyn CatalogProvider>> {
        let provider = HttpCatalogProvider::new(
            self.config.provider_url()?,
            self.config.provider.api_key.clone(),
            self.config.fetch_timeout(),
            self.config.provider.requests_per_second,
        )?;
        Ok(Arc::new(provider))
    }

    /// Webhook notifier if configured, otherwise one that only logs
    pub fn sender(&self) -> Result<Arc<dyn FollowUpSender>> {
        match self.config.notifier.webhook_url.as_deref() {
            Some(url) => Ok(Arc::new(WebhookNotifier::new(
                url,
                self.config.fetch_timeout(),
            )?)),
            None => Ok(Arc::new(LogNotifier)),
        }
    }

    pub fn sweeper(&self) -> Result<RefreshSweeper> {
        Ok(RefreshSweeper::new(
            self.manager.clone(),
            self.log.clone(),
            self.config.ttl_policy(),
            self.provider()?,
            self.sender()?,
        ))
    }

    pub fn maintenance(&self) -> Result<Maintenance> {
        let priority = PriorityRefresher::new(
            self.manager.clone(),
            self.config.ttl_policy(),
            self.config.lead_window(),
            self.config.refresh.priority_per_minute,
            self.config.refresh.priority_concurrency,
        );
        Ok(Maintenance::new(
            self.store.clone(),
            self.queries.clone(),
            self.log.clone(),
            self.signal.clone(),
            priority,
            self.sweeper()?,
            self.provider()?,
            Arc::new(StaticFollowGraph::new(self.config.followed.iter().cloned())),
        ))
    }

    pub fn stats(&self) -> Result<MirrorStats> {
        MirrorStats::collect(&self.store, &self.queries, &self.log, &self.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};
    use crate::store::CatalogPayload;
    use std::time::Duration;

    fn context(config: Config) -> CommandContext {
        CommandContext::with_database(
            config,
            Database::open_in_memory().unwrap(),
            OutputFormat::Json,
        )
    }

    #[test]
    fn test_store_writes_move_the_signal() {
        let ctx = context(Config::default());
        let before = ctx.signal.current_token().unwrap();

        ctx.store
            .upsert("show-1", &CatalogPayload::show("Hard Fork"), Duration::from_secs(60))
            .unwrap();

        assert!(ctx.signal.is_stale(before).unwrap());
        assert_eq!(ctx.stats().unwrap().entities.total, 1);
    }

    #[test]
    fn test_provider_requires_url() {
        let ctx = context(Config::default());
        assert!(matches!(
            ctx.provider(),
            Err(Error::Config(ConfigError::MissingProvider))
        ));
        // Local-only commands still work
        assert!(ctx.stats().is_ok());
    }

    #[test]
    fn test_maintenance_builds_with_provider() {
        let mut config = Config::default();
        config.provider.base_url = Some("http://127.0.0.1:9".to_string());
        let ctx = context(config);
        assert!(ctx.maintenance().is_ok());
        assert!(ctx.sender().is_ok());
    }
}
