//! Sweep and maintain commands

use colored::Colorize;
use std::time::Duration;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::{Error, Result};
use crate::maintenance::MaintenanceReport;
use crate::output::formatters::format_local;
use crate::output::table::format_fields;
use crate::output::{Formattable, json, print};
use crate::refresh_log::SweepReport;

impl Formattable for SweepReport {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json(self)?,
            OutputFormat::Table => format_fields(&[
                ("Skipped", self.skipped.to_string()),
                ("Interrupted", self.interrupted.to_string()),
                ("Entities", self.distinct_ids.to_string()),
                ("Succeeded", self.succeeded.to_string()),
                ("Failed", self.failed.to_string()),
                ("Abandoned", self.abandoned.to_string()),
                ("Entries closed", self.entries_processed.to_string()),
            ]),
            OutputFormat::Pretty => {
                if self.skipped {
                    format!("{} Another sweep is running; skipped", "○".dimmed())
                } else if self.distinct_ids == 0 {
                    "No pending refresh requests".to_string()
                } else {
                    let mut line = format!(
                        "{} Swept {} entities: {} refreshed, {} failed",
                        "✓".green(),
                        self.distinct_ids,
                        self.succeeded,
                        self.failed
                    );
                    if self.abandoned > 0 {
                        line.push_str(&format!(", {} given up", self.abandoned).yellow().to_string());
                    }
                    if self.interrupted {
                        line.push_str(&" (lease lost, rest left pending)".yellow().to_string());
                    }
                    line
                }
            }
        })
    }
}

impl Formattable for MaintenanceReport {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json(self)?,
            OutputFormat::Table => {
                let fields: Vec<(&str, String)> = self
                    .tasks
                    .iter()
                    .map(|t| {
                        let value = match &t.error {
                            Some(e) => format!("failed: {}", e),
                            None => "ok".to_string(),
                        };
                        (t.task, value)
                    })
                    .collect();
                format_fields(&fields)
            }
            OutputFormat::Pretty => {
                let mut out = vec![format!(
                    "Maintenance cycle at {}",
                    format_local(self.started_at).bold()
                )];
                for task in &self.tasks {
                    match &task.error {
                        None => out.push(format!("  {} {}", "✓".green(), task.task)),
                        Some(e) => out.push(format!("  {} {}: {}", "✗".red(), task.task, e)),
                    }
                }
                if let Some(stats) = &self.final_stats {
                    out.push(format!(
                        "  {} entities ({} stale), {} refresh requests pending, token {}",
                        stats.entities.total,
                        stats.entities.stale,
                        stats.refresh_log.pending,
                        stats.signal.token
                    ));
                }
                out.join("\n")
            }
        })
    }
}

/// Process pending refresh requests once
pub async fn sweep(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let report = ctx.sweeper()?.sweep().await?;
    print(&report, ctx.format)
}

/// Run one maintenance cycle, or repeat every `every` seconds
pub async fn maintain(opts: &GlobalOptions, every: Option<u64>) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let maintenance = ctx.maintenance()?;

    match every {
        None => {
            let report = maintenance.run_cycle().await;
            print(&report, ctx.format)?;
            if report.success() {
                Ok(())
            } else {
                Err(Error::Other("maintenance cycle had failed tasks".to_string()))
            }
        }
        Some(0) => Err(Error::Validation("--every must be positive".to_string())),
        Some(secs) => {
            let format = ctx.format;
            let cycles = maintenance
                .run_every(Duration::from_secs(secs), |report| {
                    if let Err(e) = print(report, format) {
                        log::error!("Failed to print maintenance report: {}", e);
                    }
                })
                .await?;
            log::info!("Stopped after {} maintenance cycles", cycles);
            Ok(())
        }
    }
}
