//! A set of built-in tools that models can use.

mod diagram;
mod fetch;
mod sql_query;
mod web_scraper;

use thoughtloop_core::{Error, Registry};

pub use diagram::{GraphvizTool, MermaidTool};
pub use fetch::{FetchContext, FetchError};
pub use sql_query::SqlQueryTool;
pub use web_scraper::WebScraperTool;

/// Creates a registry with every built-in tool.
///
/// Web requests go through `fetch`, and SQL queries run against
/// `db_path`.
pub fn default_registry(
    fetch: FetchContext,
    db_path: impl Into<std::path::PathBuf>,
) -> Result<Registry, Error> {
    let mut registry = Registry::new();
    registry.register(WebScraperTool::new(fetch))?;
    registry.register(SqlQueryTool::new(db_path))?;
    registry.register(GraphvizTool::new())?;
    registry.register(MermaidTool::new())?;
    Ok(registry)
}
