//! Paging arguments for search

use clap::Args;

use crate::cache::SearchParams;

/// Offset/limit window over a result set.
///
/// Flatten this into any command that pages:
/// ```ignore
/// Search {
///     #[command(flatten)]
///     page: PageArgs,
/// }
/// ```
#[derive(Args, Debug, Clone)]
pub struct PageArgs {
    /// Results to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Maximum results to return
    #[arg(long, short = 'n', default_value_t = SearchParams::DEFAULT_LIMIT)]
    pub limit: usize,
}

impl Default for PageArgs {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: SearchParams::DEFAULT_LIMIT,
        }
    }
}

impl PageArgs {
    /// Apply this window to search parameters
    pub fn apply(&self, params: SearchParams) -> SearchParams {
        params.page(self.offset, self.limit.max(1))
    }
}
