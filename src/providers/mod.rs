/// Provider clients for the two upstream data sources
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{CatalogEntry, MarketMetrics, OhlcvRecord, TradingPair};

pub mod binance;
pub mod coingecko;

pub use binance::BinanceClient;
pub use coingecko::CoinGeckoClient;

/// Exchange-side market data: pair discovery and OHLCV candles.
#[async_trait]
pub trait ExchangeProvider: Send + Sync {
    /// All currently tradeable pairs, filtered to the configured quote assets.
    async fn list_active_pairs(&self) -> Result<Vec<TradingPair>>;

    /// Daily candles for `symbol`, ascending by date. Partial history is not
    /// an error: assets listed after `from` simply return fewer rows.
    async fn get_daily_candles(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvRecord>>;

    /// Rolling 24h ticker for the current, incomplete day.
    async fn get_24h_snapshot(&self, symbol: &str) -> Result<OhlcvRecord>;
}

/// Aggregator-side market data: coin catalog and market metrics.
#[async_trait]
pub trait AggregatorProvider: Send + Sync {
    /// Full coin catalog. Used only to refresh the symbol-mapping cache.
    async fn list_catalog(&self) -> Result<Vec<CatalogEntry>>;

    /// Current market metrics for many coins at once, batched internally to
    /// the provider's per-call id cap.
    async fn get_market_metrics(&self, ids: &[String]) -> Result<HashMap<String, MarketMetrics>>;

    /// Daily historical series for one coin, ascending by date.
    async fn get_historical_series(&self, id: &str, days: u32) -> Result<Vec<MarketMetrics>>;
}
