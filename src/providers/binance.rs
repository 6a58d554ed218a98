/// Binance Spot REST client (public market data, no authentication)
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CollectError, Result};
use crate::providers::ExchangeProvider;
use crate::types::{Config, OhlcvRecord, TradingPair};
use crate::utils::{date_from_millis, millis_at_midnight, today_utc, with_retry, RateLimiter, RetryPolicy};

const BASE_URL: &str = "https://api.binance.com/api/v3";

/// Binance caps kline responses at 1000 rows per request.
const KLINE_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct Ticker24hResponse {
    symbol: String,
    #[serde(rename = "openPrice")]
    open_price: String,
    #[serde(rename = "highPrice")]
    high_price: String,
    #[serde(rename = "lowPrice")]
    low_price: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    volume: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
    count: i64,
}

/// Binance Spot REST client
pub struct BinanceClient {
    client: Client,
    base_url: String,
    quote_assets: Vec<String>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl BinanceClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        let limits = &config.exchange_rate_limit;
        let limiter = RateLimiter::new(
            "binance",
            limits.max_calls_per_minute,
            Duration::from_secs(60),
            Duration::from_millis(limits.min_interval_ms),
        );

        Ok(BinanceClient {
            client,
            base_url: BASE_URL.to_string(),
            quote_assets: config.quote_assets.clone(),
            limiter: Arc::new(limiter),
            retry: RetryPolicy::new(
                config.max_retries,
                config.retry_backoff_secs.clone(),
                Duration::from_secs(config.throttle_cooldown_secs),
            ),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            return Err(CollectError::Throttled {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// Parse one kline row. Binance returns a positional JSON array:
    /// [openTime, open, high, low, close, volume, closeTime, quoteVolume,
    ///  trades, ...]
    fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<OhlcvRecord> {
        if row.len() < 9 {
            return Err(CollectError::MalformedResponse(format!(
                "kline row too short for {}: {} fields",
                symbol,
                row.len()
            )));
        }

        let open_time = row[0].as_i64().ok_or_else(|| {
            CollectError::MalformedResponse(format!("non-numeric kline open time for {}", symbol))
        })?;
        let date = date_from_millis(open_time).ok_or_else(|| {
            CollectError::MalformedResponse(format!("kline open time out of range for {}", symbol))
        })?;

        let number = |idx: usize| -> Result<f64> {
            row[idx]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| {
                    CollectError::MalformedResponse(format!(
                        "bad kline field {} for {}",
                        idx, symbol
                    ))
                })
        };

        Ok(OhlcvRecord {
            date,
            symbol: symbol.to_string(),
            open: number(1)?,
            high: number(2)?,
            low: number(3)?,
            close: number(4)?,
            volume: number(5)?,
            quote_volume: number(7)?,
            trade_count: row[8].as_i64().unwrap_or(0),
        })
    }

    fn parse_number(symbol: &str, field: &str, value: &str) -> Result<f64> {
        value.parse::<f64>().map_err(|_| {
            CollectError::MalformedResponse(format!("bad {} for {}: {}", field, symbol, value))
        })
    }
}

#[async_trait]
impl ExchangeProvider for BinanceClient {
    async fn list_active_pairs(&self) -> Result<Vec<TradingPair>> {
        info!("Fetching exchange trading pairs...");
        let url = format!("{}/exchangeInfo", self.base_url);

        let response: ExchangeInfoResponse =
            with_retry(&self.retry, &self.limiter, "exchange_info", || {
                self.get_json(&url)
            })
            .await?;

        let pairs: Vec<TradingPair> = response
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && self.quote_assets.contains(&s.quote_asset))
            .map(|s| TradingPair {
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
            })
            .collect();

        info!("Found {} active trading pairs", pairs.len());
        Ok(pairs)
    }

    async fn get_daily_candles(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OhlcvRecord>> {
        let mut records: Vec<OhlcvRecord> = Vec::new();
        let mut start_ms = millis_at_midnight(from);
        let end_ms = millis_at_midnight(to) + 86_400_000 - 1;

        // Page through the response cap until the range is exhausted
        loop {
            let url = format!(
                "{}/klines?symbol={}&interval=1d&startTime={}&endTime={}&limit={}",
                self.base_url, symbol, start_ms, end_ms, KLINE_PAGE_LIMIT
            );

            let rows: Vec<Vec<serde_json::Value>> =
                with_retry(&self.retry, &self.limiter, "klines", || self.get_json(&url)).await?;

            let page_len = rows.len();
            for row in &rows {
                records.push(Self::parse_kline(symbol, row)?);
            }

            if page_len < KLINE_PAGE_LIMIT {
                break;
            }
            match records.last() {
                Some(last) => start_ms = millis_at_midnight(last.date) + 86_400_000,
                None => break,
            }
            if start_ms > end_ms {
                break;
            }
        }

        debug!("Downloaded {} daily candles for {}", records.len(), symbol);
        Ok(records)
    }

    async fn get_24h_snapshot(&self, symbol: &str) -> Result<OhlcvRecord> {
        let url = format!("{}/ticker/24hr?symbol={}", self.base_url, symbol);

        let ticker: Ticker24hResponse =
            with_retry(&self.retry, &self.limiter, "ticker_24h", || {
                self.get_json(&url)
            })
            .await?;

        Ok(OhlcvRecord {
            date: today_utc(),
            symbol: ticker.symbol.clone(),
            open: Self::parse_number(symbol, "openPrice", &ticker.open_price)?,
            high: Self::parse_number(symbol, "highPrice", &ticker.high_price)?,
            low: Self::parse_number(symbol, "lowPrice", &ticker.low_price)?,
            close: Self::parse_number(symbol, "lastPrice", &ticker.last_price)?,
            volume: Self::parse_number(symbol, "volume", &ticker.volume)?,
            quote_volume: Self::parse_number(symbol, "quoteVolume", &ticker.quote_volume)?,
            trade_count: ticker.count,
        })
    }
}
