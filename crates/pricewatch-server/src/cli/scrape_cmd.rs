//! `pricewatch scrape <QUERY>`: one query, inline.

use crate::app::build_orchestrator;
use crate::cli::output::{print_header, print_json, print_scrape_report, Styled};
use anyhow::{Context, Result};
use pricewatch::{Config, Query, RunOptions};

/// Scrape one query.
pub async fn run(config: &Config, query: &str, store: bool, debug: bool, json: bool) -> Result<()> {
    let query = Query::new(query).context("invalid query")?;
    let orchestrator = build_orchestrator(config, store).await?;

    let report = orchestrator
        .run_query(&query, RunOptions { store, debug })
        .await
        .with_context(|| format!("scrape of {query:?} failed"))?;

    if json {
        return print_json(&report);
    }
    let s = Styled::new();
    print_header(&s);
    print_scrape_report(&s, &report);
    Ok(())
}
