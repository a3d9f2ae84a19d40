//! Query cache management commands

use crate::cli::CommandContext;
use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;
use crate::error::{Error, Result};

fn print_removed(format: OutputFormat, removed: usize, what: &str) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "entries_removed": removed,
                "success": true,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if removed > 0 {
                println!("Removed {} {} query results", removed, what);
            } else {
                println!("No {} query results to remove", what);
            }
        }
    }
    Ok(())
}

/// Clear all cached query results
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.queries.clear()?;
    print_removed(ctx.format, removed, "cached")
}

/// Remove expired query results
pub fn purge(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let removed = ctx.queries.purge_expired()?;
    print_removed(ctx.format, removed, "expired")
}

/// Show the mirror database path
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let path = ctx
        .db
        .path()
        .ok_or_else(|| Error::Other("mirror is not file-backed".to_string()))?;
    println!("{}", path.display());
    Ok(())
}
