//! `pricewatch cards`: read the cards-with-latest-price view.

use crate::app::build_store;
use crate::cli::output::{format_price, print_header, print_json, print_section, Styled};
use anyhow::{Context, Result};
use pricewatch::store::CardQuery;
use pricewatch::Config;

/// List cards from the `cards_with_prices` view.
pub async fn run(config: &Config, query: CardQuery, json: bool) -> Result<()> {
    config.require_store()?;
    let store = build_store(config)?.context("record store is not configured")?;
    let rows = store
        .cards_with_prices(&query)
        .await
        .context("querying cards_with_prices")?;

    if json {
        return print_json(&rows);
    }

    let s = Styled::new();
    print_header(&s);
    print_section(&s, &format!("{} cards", rows.len()));
    for row in &rows {
        let price = row
            .latest_price
            .map(format_price)
            .unwrap_or_else(|| s.dim("no price"));
        let count = row.price_count.unwrap_or(0);
        let updated = row
            .last_price_update
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        eprintln!(
            "    {:>6}  {:<40} {:>12}  {}",
            row.id,
            row.name,
            price,
            s.dim(&format!("{count} obs {updated}"))
        );
    }
    Ok(())
}
