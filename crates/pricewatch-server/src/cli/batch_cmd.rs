//! `pricewatch batch <QUERY>...`: bounded-parallel batch.

use crate::app::build_orchestrator;
use crate::cli::output::{print_batch_report, print_header, print_json, Styled};
use anyhow::{Context, Result};
use pricewatch::{validate_batch, Config, Query, RunOptions};

/// Scrape several queries concurrently.
pub async fn run(
    config: &Config,
    queries: &[String],
    store: bool,
    max_concurrent: Option<usize>,
    json: bool,
) -> Result<()> {
    let limit = validate_batch(queries.len(), max_concurrent.or(Some(config.max_concurrent)))?;
    let queries = queries
        .iter()
        .map(Query::new)
        .collect::<Result<Vec<_>, _>>()
        .context("invalid query")?;

    let orchestrator = build_orchestrator(config, store).await?;
    let report = orchestrator
        .run_batch(queries, limit, RunOptions { store, debug: false })
        .await;

    if json {
        return print_json(&report);
    }
    let s = Styled::new();
    print_header(&s);
    print_batch_report(&s, &report);
    Ok(())
}
