//! Status command implementation

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::maintenance::MirrorStats;
use crate::output::formatters::{format_local, format_millis_local, format_size};
use crate::output::table::format_fields;
use crate::output::{Formattable, json, print};

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub config_path: Option<String>,
    pub database: Option<String>,
    pub provider_url: Option<String>,
    pub webhook_configured: bool,
    pub followed: usize,
    pub stats: MirrorStats,
}

impl StatusView {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let s = &self.stats;
        vec![
            ("Config", self.config_path.clone().unwrap_or_else(|| "defaults".into())),
            ("Database", self.database.clone().unwrap_or_else(|| "in-memory".into())),
            ("Provider", self.provider_url.clone().unwrap_or_else(|| "not configured".into())),
            ("Webhook", yes_no(self.webhook_configured)),
            ("Followed", self.followed.to_string()),
            ("Entities", s.entities.total.to_string()),
            ("Shows", s.entities.shows.to_string()),
            ("Episodes", s.entities.episodes.to_string()),
            ("Permanent", s.entities.permanent.to_string()),
            ("Fresh", s.entities.fresh.to_string()),
            ("Stale", s.entities.stale.to_string()),
            ("Queries valid", s.queries.valid_entries.to_string()),
            ("Queries expired", s.queries.expired_entries.to_string()),
            ("Query cache size", format_size(s.queries.total_size_bytes)),
            ("Refresh pending", s.refresh_log.pending.to_string()),
            ("Follow-ups sent", s.refresh_log.follow_ups_sent.to_string()),
            ("Signal token", s.signal.token.to_string()),
            ("Signal moved", format_local(s.signal.updated_at)),
        ]
    }

    fn pretty(&self) -> String {
        let s = &self.stats;
        let mut out = Vec::new();
        out.push(format!("{}\n", "podmirror Status".bold()));

        match &self.config_path {
            Some(path) => out.push(format!("Config file: {}", path.cyan())),
            None => out.push(format!("Config file: {}", "none (defaults)".dimmed())),
        }
        if let Some(db) = &self.database {
            out.push(format!("Database:    {}", db.cyan()));
        }
        out.push(String::new());

        match &self.provider_url {
            Some(url) => out.push(format!("{} Catalog provider: {}", "✓".green(), url)),
            None => {
                out.push(format!("{} Catalog provider not configured", "✗".red()));
                out.push("  → Set provider.base_url or PODMIRROR_PROVIDER_URL".to_string());
            }
        }
        if self.webhook_configured {
            out.push(format!("{} Follow-up webhook configured", "✓".green()));
        } else {
            out.push(format!(
                "{} No follow-up webhook (follow-ups are logged only)",
                "○".dimmed()
            ));
        }
        out.push(format!("{} {} followed ids", "○".dimmed(), self.followed));
        out.push(String::new());

        out.push("Entities".bold().to_string());
        out.push(format!(
            "  {} total ({} shows, {} episodes)",
            s.entities.total, s.entities.shows, s.entities.episodes
        ));
        out.push(format!(
            "  {} permanent, {} fresh, {}",
            s.entities.permanent,
            s.entities.fresh,
            stale_label(s.entities.stale)
        ));

        out.push("Query cache".bold().to_string());
        out.push(format!(
            "  {} valid, {} expired, {}",
            s.queries.valid_entries,
            s.queries.expired_entries,
            format_size(s.queries.total_size_bytes)
        ));
        if s.queries.valid_entries > 0 {
            out.push(format!(
                "  oldest {}, newest {}",
                format_millis_local(s.queries.oldest_entry),
                format_millis_local(s.queries.newest_entry)
            ));
        }

        out.push("Refresh log".bold().to_string());
        out.push(format!(
            "  {} pending across {} ids, {} processed, {} follow-ups sent",
            s.refresh_log.pending,
            s.refresh_log.distinct_pending,
            s.refresh_log.processed,
            s.refresh_log.follow_ups_sent
        ));

        out.push("Invalidation signal".bold().to_string());
        out.push(format!(
            "  token {} (moved {})",
            s.signal.token.to_string().cyan(),
            format_local(s.signal.updated_at)
        ));

        out.join("\n")
    }
}

impl Formattable for StatusView {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json_at(self, self.stats.signal.token)?,
            OutputFormat::Table => format_fields(&self.fields()),
            OutputFormat::Pretty => self.pretty(),
        })
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

fn stale_label(stale: usize) -> String {
    let label = format!("{} stale", stale);
    if stale > 0 {
        label.yellow().to_string()
    } else {
        label
    }
}

/// Run the status command
pub fn run(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;

    let config_path = match opts.config_ref() {
        Some(path) => Some(path.to_path_buf()),
        None => Config::default_path().ok().filter(|p| p.exists()),
    };

    let view = StatusView {
        config_path: config_path.map(|p| p.display().to_string()),
        database: ctx.db.path().map(|p| p.display().to_string()),
        provider_url: ctx.config.provider_url().ok().map(str::to_string),
        webhook_configured: ctx.config.notifier.webhook_url.is_some(),
        followed: ctx.config.followed.len(),
        stats: ctx.stats()?,
    };

    print(&view, ctx.format)
}
