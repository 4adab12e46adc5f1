//! CLI subcommand implementations for the pricewatch binary.

pub mod batch_cmd;
pub mod cards_cmd;
pub mod output;
pub mod schedule_cmd;
pub mod scrape_cmd;
pub mod serve;
