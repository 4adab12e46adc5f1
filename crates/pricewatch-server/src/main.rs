use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pricewatch::store::{CardOrder, CardQuery};
use pricewatch::Config;
use pricewatch_server::cli::{batch_cmd, cards_cmd, schedule_cmd, scrape_cmd, serve};
use pricewatch_server::logging::{self, LogFormat};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pricewatch", version, about = "Sold-listing price scraper for collectible cards")]
struct Cli {
    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000")]
        addr: SocketAddr,
    },
    /// Scrape one query
    Scrape {
        query: String,
        /// Write results to the record store
        #[arg(long)]
        store: bool,
        /// Include the extraction trace
        #[arg(long)]
        debug: bool,
    },
    /// Scrape several queries concurrently
    Batch {
        #[arg(required = true)]
        queries: Vec<String>,
        #[arg(long)]
        store: bool,
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Sweep a catalog one query at a time
    Schedule {
        /// JSON catalog file (defaults to PRICEWATCH_CATALOG, then the built-in list)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Pause between queries
        #[arg(long)]
        delay_secs: Option<u64>,
        /// Observe only; do not write to the record store
        #[arg(long)]
        no_store: bool,
        /// Repeat the sweep on this period until interrupted
        #[arg(long)]
        every_secs: Option<u64>,
    },
    /// List stored cards with their latest price
    Cards {
        /// Case-insensitive name filter
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
        /// Only cards that have a price
        #[arg(long)]
        priced: bool,
        #[arg(long, value_enum, default_value_t = OrderArg::LatestPrice)]
        order_by: OrderArg,
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    LatestPrice,
    CreatedAt,
    Name,
}

impl From<OrderArg> for CardOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::LatestPrice => CardOrder::LatestPrice,
            OrderArg::CreatedAt => CardOrder::CreatedAt,
            OrderArg::Name => CardOrder::Name,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { addr } => serve::run(&config, addr).await,
        Command::Scrape { query, store, debug } => {
            scrape_cmd::run(&config, &query, store, debug, cli.json).await
        }
        Command::Batch {
            queries,
            store,
            max_concurrent,
        } => batch_cmd::run(&config, &queries, store, max_concurrent, cli.json).await,
        Command::Schedule {
            catalog,
            delay_secs,
            no_store,
            every_secs,
        } => {
            let args = schedule_cmd::ScheduleArgs {
                catalog,
                delay_secs,
                no_store,
                every_secs,
            };
            schedule_cmd::run(&config, args, cli.json).await
        }
        Command::Cards {
            name,
            min_price,
            max_price,
            priced,
            order_by,
            asc,
            limit,
        } => {
            let query = CardQuery {
                name_contains: name,
                min_price,
                max_price,
                only_priced: priced,
                order_by: order_by.into(),
                descending: !asc,
                limit: Some(limit),
            };
            cards_cmd::run(&config, query, cli.json).await
        }
    }
}
