//! Invalidation signal commands

use colored::Colorize;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::formatters::format_local;
use crate::output::table::format_fields;
use crate::output::{Formattable, json, print};
use crate::signal::SignalSnapshot;

impl Formattable for SignalSnapshot {
    fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => json::format_json_at(self, self.token)?,
            OutputFormat::Table => format_fields(&[
                ("Token", self.token.to_string()),
                ("Updated", format_local(self.updated_at)),
            ]),
            OutputFormat::Pretty => format!(
                "Token {} (moved {})",
                self.token.to_string().cyan(),
                format_local(self.updated_at)
            ),
        })
    }
}

/// Print the current token
pub fn show(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    print(&ctx.signal.snapshot()?, ctx.format)
}

/// Advance the token so every derived view recomputes
pub fn bump(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let token = ctx.signal.bump()?;
    log::info!("Invalidation signal bumped to {}", token);
    print(&ctx.signal.snapshot()?, ctx.format)
}
