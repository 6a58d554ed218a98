/// Merging exchange OHLCV with aggregator market metrics
use crate::types::{EnrichedRecord, MarketMetrics, OhlcvRecord, TradingPair};

/// Why a candle could not be enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeReason {
    /// Metrics are dated and the date does not match the candle's.
    DateMismatch,
    /// Neither a market cap nor the supply needed to derive one.
    NoMarketCap,
}

impl ExcludeReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExcludeReason::DateMismatch => "date mismatch",
            ExcludeReason::NoMarketCap => "no market cap or supply",
        }
    }
}

/// Merge one OHLCV candle with the aggregator metrics for the same asset.
///
/// Pure function, no I/O. The provider's market cap is taken verbatim when
/// present. When it is absent but circulating supply and a price exist, the
/// cap is computed as price x supply and the row flagged as derived; a
/// derived value never overrides a provider value. Rows with neither cap
/// nor supply are excluded.
pub fn merge(
    ohlcv: &OhlcvRecord,
    pair: &TradingPair,
    coin_id: &str,
    metrics: &MarketMetrics,
) -> Result<EnrichedRecord, ExcludeReason> {
    // Dated metrics must align with the candle; a current snapshot
    // (date == None) applies to the current day's candle by construction
    if let Some(metrics_date) = metrics.date {
        if metrics_date != ohlcv.date {
            return Err(ExcludeReason::DateMismatch);
        }
    }

    let (market_cap, derived) = match metrics.market_cap {
        Some(cap) => (cap, false),
        None => {
            let price = metrics.price.unwrap_or(ohlcv.close);
            match metrics.circulating_supply {
                Some(supply) => (price * supply, true),
                None => return Err(ExcludeReason::NoMarketCap),
            }
        }
    };

    Ok(EnrichedRecord {
        date: ohlcv.date,
        symbol: ohlcv.symbol.clone(),
        base_asset: pair.base_asset.clone(),
        coin_id: coin_id.to_string(),
        open: ohlcv.open,
        high: ohlcv.high,
        low: ohlcv.low,
        close: ohlcv.close,
        volume: ohlcv.volume,
        quote_volume: ohlcv.quote_volume,
        trade_count: ohlcv.trade_count,
        market_cap,
        market_cap_derived: derived,
        circulating_supply: metrics.circulating_supply,
        total_supply: metrics.total_supply,
        max_supply: metrics.max_supply,
    })
}
