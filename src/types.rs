/// Core type definitions for the EOD collector
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An active exchange trading pair, as discovered from the exchange-info
/// endpoint. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

/// One daily OHLCV candle from the exchange. One per (symbol, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: i64,
}

/// One entry of the aggregator's full coin catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

/// Market-level metrics from the aggregator for one coin.
///
/// `date == None` means a current spot snapshot rather than a historical
/// daily value. `max_supply` stays `None` for uncapped assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMetrics {
    pub coin_id: String,
    pub date: Option<NaiveDate>,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
}

/// Exchange OHLCV merged with aggregator market metrics for the same
/// asset and date. `market_cap_derived` marks rows where the cap was
/// computed from price x circulating supply because the provider value
/// was absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub base_asset: String,
    pub coin_id: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: i64,
    pub market_cap: f64,
    pub market_cap_derived: bool,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
}

impl EnrichedRecord {
    /// De-duplication key for the persisted result set.
    pub fn key(&self) -> (NaiveDate, String) {
        (self.date, self.symbol.clone())
    }
}

/// Per-provider rate limit budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_calls_per_minute: u32,
    pub min_interval_ms: u64,
    pub monthly_call_cap: Option<u32>,
}

/// Configuration for the collector
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Storage
    pub data_dir: String,
    pub output_file: String,

    // Universe
    pub quote_assets: Vec<String>,
    pub history_days: u32,

    // Checkpointing
    pub checkpoint_interval: usize,

    // Symbol mapping
    pub mapping_cache_ttl_hours: i64,

    // Aggregator batching
    pub metrics_batch_size: usize,

    // HTTP
    pub http_timeout_secs: u64,

    // Retry / throttling
    pub max_retries: u32,
    pub retry_backoff_secs: Vec<u64>,
    pub throttle_cooldown_secs: u64,

    // Rate limiting
    pub exchange_rate_limit: RateLimitConfig,
    pub aggregator_rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: "data".to_string(),
            output_file: "all_pairs_eod.csv".to_string(),
            quote_assets: vec!["USDT".to_string()],
            history_days: 365,
            checkpoint_interval: 50,
            mapping_cache_ttl_hours: 24,
            metrics_batch_size: 250,
            http_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_secs: vec![2, 4, 8],
            throttle_cooldown_secs: 60,
            exchange_rate_limit: RateLimitConfig {
                max_calls_per_minute: 100,
                min_interval_ms: 500,
                monthly_call_cap: None,
            },
            aggregator_rate_limit: RateLimitConfig {
                max_calls_per_minute: 30,
                min_interval_ms: 2000,
                monthly_call_cap: Some(10_000),
            },
        }
    }
}
