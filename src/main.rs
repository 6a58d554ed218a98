/// Main entry point for the EOD collector
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use coinharvest::collector::EodCollector;
use coinharvest::config::load_config;
use coinharvest::data::RecordStore;
use coinharvest::mapping::SymbolMapper;
use coinharvest::providers::{BinanceClient, CoinGeckoClient};

#[derive(Parser)]
#[command(name = "coinharvest")]
#[command(about = "End-of-day crypto market data collector (Binance OHLCV + CoinGecko market caps)", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect daily history for every discovered trading pair
    Historical {
        /// Days of history to collect (default from config)
        #[arg(long)]
        days: Option<u32>,

        /// Restrict to specific symbols (comma separated, e.g. "BTCUSDT,ETHUSDT")
        #[arg(long)]
        symbols: Option<String>,

        /// Cap the number of symbols (for test runs)
        #[arg(long)]
        max_symbols: Option<usize>,
    },

    /// Fetch today's snapshot for known symbols and merge it in
    Update {
        /// Restrict to specific symbols (comma separated)
        #[arg(long)]
        symbols: Option<String>,
    },

    /// Summarize the persisted result set
    Stats,
}

fn parse_symbols(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|s| {
        s.split(',')
            .map(|sym| sym.trim().to_uppercase())
            .filter(|sym| !sym.is_empty())
            .collect()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("coinharvest={}", cli.log_level))),
        )
        .init();

    info!("🚀 coinharvest EOD collector");

    // Load configuration
    let config = Arc::new(load_config(&cli.config)?);
    let data_dir = PathBuf::from(&config.data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;

    match cli.command {
        Commands::Historical {
            days,
            symbols,
            max_symbols,
        } => {
            let collector = build_collector(&config)?;
            let days = days.unwrap_or(config.history_days);
            let filter = parse_symbols(symbols);
            collector
                .collect_historical(days, filter.as_deref(), max_symbols)
                .await?;
        }
        Commands::Update { symbols } => {
            let collector = build_collector(&config)?;
            let filter = parse_symbols(symbols);
            collector.collect_daily_update(filter.as_deref()).await?;
        }
        Commands::Stats => {
            let store = RecordStore::new(data_dir.join(&config.output_file));
            let summary = store.summary().await?;
            info!("📈 Result set summary:");
            info!("   Total records: {}", summary.total_records);
            info!("   Unique symbols: {}", summary.unique_symbols);
            match (summary.first_date, summary.last_date) {
                (Some(first), Some(last)) => info!("   Date range: {} to {}", first, last),
                _ => info!("   Date range: (empty)"),
            }
        }
    }

    Ok(())
}

fn build_collector(
    config: &Arc<coinharvest::Config>,
) -> anyhow::Result<EodCollector<BinanceClient, CoinGeckoClient>> {
    let exchange = Arc::new(BinanceClient::new(config)?);
    let aggregator = Arc::new(CoinGeckoClient::new(config)?);

    let cache_file = PathBuf::from(&config.data_dir).join("symbol_mapping.json");
    let mapper = Arc::new(SymbolMapper::load(
        Arc::clone(&aggregator),
        cache_file,
        config.mapping_cache_ttl_hours,
    ));

    Ok(EodCollector::new(
        exchange,
        aggregator,
        mapper,
        Arc::clone(config),
    ))
}
