//! Search command implementation

use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::cache::{ResultSet, SearchParams, SearchSort};
use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat, PageArgs};
use crate::client::CatalogItem;
use crate::error::{Error, Result};
use crate::output::formatters::{format_local, truncate};
use crate::output::table::format_table;
use crate::output::{Formattable, json, print};

#[derive(Debug, Tabled)]
struct SearchRow {
    #[tabled(rename = "ID")]
    external_id: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "TITLE")]
    title: String,
    #[tabled(rename = "PUBLISHED")]
    published: String,
}

impl From<&CatalogItem> for SearchRow {
    fn from(item: &CatalogItem) -> Self {
        Self {
            external_id: item.external_id.clone(),
            kind: item.payload.kind.to_string(),
            title: truncate(&item.payload.title, 60),
            published: item
                .payload
                .published_at
                .map(format_local)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchView {
    params: SearchParams,
    #[serde(flatten)]
    results: ResultSet<CatalogItem>,
}

impl Formattable for SearchView {
    fn format(&self, format: OutputFormat) -> Result<String> {
        let rows: Vec<SearchRow> = self.results.items.iter().map(SearchRow::from).collect();
        Ok(match format {
            OutputFormat::Json => json::format_json(self)?,
            OutputFormat::Table => format_table(&rows),
            OutputFormat::Pretty => {
                if rows.is_empty() {
                    return Ok(format!("No results for \"{}\".", self.params.query));
                }
                let mut out = vec![format_table(&rows)];
                let shown_to = self.results.offset + self.results.items.len();
                let mut footer = format!(
                    "Showing {}-{} of {}",
                    self.results.offset + 1,
                    shown_to,
                    self.results.total
                );
                if self.results.has_more() {
                    footer.push_str(&format!(" (next: --offset {})", shown_to));
                }
                out.push(footer.dimmed().to_string());
                out.join("\n")
            }
        })
    }
}

/// Run a catalog search, answering from the query cache when possible
pub async fn run(
    opts: &GlobalOptions,
    query: &str,
    genre: Option<u32>,
    sort: SearchSort,
    page: &PageArgs,
) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::Validation("search query is required".to_string()));
    }

    let ctx = CommandContext::new(opts)?;
    let provider = ctx.provider()?;

    let mut params = page.apply(SearchParams::new(query).sort_by(sort));
    if let Some(genre) = genre {
        params = params.genre(genre);
    }

    let key = params.cache_key();
    let results = ctx
        .queries
        .get_or_compute(
            &key,
            || async { provider.search(&params).await.map_err(Error::from) },
            ctx.config.ttl_policy().search,
        )
        .await?;

    print(&SearchView { params, results }, ctx.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatalogPayload;

    fn view(total: usize, offset: usize, count: usize) -> SearchView {
        let items = (offset..offset + count)
            .map(|i| CatalogItem {
                external_id: format!("show-{}", i),
                payload: CatalogPayload::show(format!("Show {}", i)),
            })
            .collect();
        SearchView {
            params: SearchParams::new("show").page(offset, count.max(1)),
            results: ResultSet::new(items, total, offset, count.max(1)),
        }
    }

    #[test]
    fn test_pretty_footer_points_to_next_page() {
        colored::control::set_override(false);
        let out = view(25, 10, 10).format(OutputFormat::Pretty).unwrap();
        assert!(out.contains("Showing 11-20 of 25"));
        assert!(out.contains("--offset 20"));
    }

    #[test]
    fn test_pretty_empty() {
        let out = view(0, 0, 0).format(OutputFormat::Pretty).unwrap();
        assert_eq!(out, "No results for \"show\".");
    }

    #[test]
    fn test_json_carries_paging() {
        let out = view(25, 0, 10).format(OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["data"]["total"], 25);
        assert_eq!(value["data"]["params"]["query"], "show");
        assert_eq!(value["data"]["items"].as_array().unwrap().len(), 10);
    }
}
