//! Resolve and record commands

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::cache::{ResolveOutcome, Resolved};
use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, KindArg, OutputFormat};
use crate::error::Result;
use crate::output::formatters::{format_expiry, format_local, truncate};
use crate::output::table::format_table;
use crate::output::{Formattable, json, print};
use crate::refresh_log::RefreshLogEntry;
use crate::signal::Token;
use crate::store::{CatalogEntity, EntityKind};

/// Table row for a resolved entity
#[derive(Debug, Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    external_id: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "TITLE")]
    title: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "EXPIRES")]
    expires: String,
}

#[derive(Debug, Serialize)]
pub struct ResolvedView {
    #[serde(flatten)]
    pub resolved: Resolved,
    #[serde(skip)]
    pub latest_episode: Option<CatalogEntity>,
    #[serde(skip)]
    pub token: Token,
}

impl ResolvedView {
    fn row(&self) -> EntityRow {
        let entity = &self.resolved.entity;
        EntityRow {
            external_id: entity.external_id.clone().unwrap_or_default(),
            kind: entity.kind.to_string(),
            title: truncate(&entity.payload.title, 48),
            state: entity.effective_state(Utc::now()).to_string(),
            source: outcome_label(self.resolved.outcome).to_string(),
            expires: format_expiry(entity.expires_at, Utc::now()),
        }
    }

    fn pretty(&self) -> String {
        let entity = &self.resolved.entity;
        let payload = &entity.payload;
        let mut out = vec![
            format!("{} {}", payload.title.bold(), format!("[{}]", entity.kind).dimmed()),
            format!(
                "  id:       {}",
                entity.external_id.as_deref().unwrap_or("-").cyan()
            ),
        ];

        let source = outcome_label(self.resolved.outcome);
        let source = match self.resolved.outcome {
            ResolveOutcome::StaleFallback => source.yellow().to_string(),
            ResolveOutcome::Fetched => source.green().to_string(),
            _ => source.to_string(),
        };
        out.push(format!("  source:   {}", source));
        out.push(format!(
            "  state:    {} (owner: {})",
            entity.effective_state(Utc::now()),
            entity.owner_kind
        ));
        out.push(format!(
            "  expires:  {}",
            format_expiry(entity.expires_at, Utc::now())
        ));

        if let Some(published) = payload.published_at {
            out.push(format!("  published: {}", format_local(published)));
        }
        if let Some(parent) = &payload.parent_external_id {
            out.push(format!("  show:     {}", parent));
        }
        if let Some(count) = payload.episode_count {
            out.push(format!("  episodes: {}", count));
        }
        if let Some(latest) = &self.latest_episode {
            out.push(format!("  latest:   {}", latest.payload.title));
        }
        if let Some(description) = &payload.description {
            out.push(String::new());
            out.push(format!("  {}", truncate(description, 240)));
        }

        out.join("\n")
    }
}

impl Formattable for ResolvedView {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json_at(self, self.token)?,
            OutputFormat::Table => format_table(&[self.row()]),
            OutputFormat::Pretty => self.pretty(),
        })
    }
}

fn outcome_label(outcome: ResolveOutcome) -> &'static str {
    match outcome {
        ResolveOutcome::Permanent => "permanent",
        ResolveOutcome::Fresh => "cache",
        ResolveOutcome::Fetched => "upstream",
        ResolveOutcome::StaleFallback => "stale fallback",
    }
}

/// Resolve one entity through the TTL cache
pub async fn resolve(opts: &GlobalOptions, external_id: &str, kind: KindArg) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let provider = ctx.provider()?;
    let ttl = ctx.config.ttl_policy().for_kind(EntityKind::from(kind));

    let resolved = ctx
        .manager
        .resolve_with(provider.as_ref(), external_id, ttl)
        .await?;

    let latest_episode = match resolved.entity.kind {
        EntityKind::Show => ctx.store.latest_episode(resolved.entity.id)?,
        EntityKind::Episode => None,
    };

    let view = ResolvedView {
        resolved,
        latest_episode,
        token: ctx.signal.current_token()?,
    };
    print(&view, ctx.format)
}

#[derive(Debug, Serialize)]
struct RecordedView {
    entry: RefreshLogEntry,
    pending: usize,
}

impl Formattable for RecordedView {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json(self)?,
            _ => format!(
                "{} Refresh requested for {} ({} pending for this id)",
                "✓".green(),
                self.entry.entity_external_id.cyan(),
                self.pending
            ),
        })
    }
}

/// Append a refresh request to the log
pub fn record(opts: &GlobalOptions, external_id: &str) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let entry = ctx.log.record(external_id)?;
    let pending = ctx
        .log
        .entries_for(&entry.entity_external_id)?
        .iter()
        .filter(|e| e.processed_at.is_none())
        .count();

    print(&RecordedView { entry, pending }, ctx.format)
}
