/// CoinGecko REST client (free tier, unauthenticated)
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CollectError, Result};
use crate::providers::AggregatorProvider;
use crate::types::{CatalogEntry, Config, MarketMetrics};
use crate::utils::{date_from_millis, with_retry, RateLimiter, RetryPolicy};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Sliding window for the free-tier monthly call ceiling.
const MONTHLY_WINDOW: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    circulating_supply: Option<f64>,
    total_supply: Option<f64>,
    max_supply: Option<f64>,
}

/// The chart endpoint also returns `total_volumes`; the exchange's own
/// volume supersedes it, so only prices and caps are read.
#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<(f64, Option<f64>)>,
    market_caps: Vec<(f64, Option<f64>)>,
}

/// CoinGecko REST client
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    batch_size: usize,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl CoinGeckoClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        let limits = &config.aggregator_rate_limit;
        let mut limiter = RateLimiter::new(
            "coingecko",
            limits.max_calls_per_minute,
            Duration::from_secs(60),
            Duration::from_millis(limits.min_interval_ms),
        );
        // The free tier also caps total calls per month; batching exists to
        // stay under this ceiling
        if let Some(cap) = limits.monthly_call_cap {
            limiter = limiter.with_budget(cap, MONTHLY_WINDOW);
        }

        Ok(CoinGeckoClient {
            client,
            base_url: BASE_URL.to_string(),
            batch_size: config.metrics_batch_size,
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

    /// Zip the market-chart's parallel arrays into dated metrics. The arrays
    /// are index-aligned on the same daily timestamps.
    fn series_from_chart(id: &str, chart: MarketChartResponse) -> Vec<MarketMetrics> {
        let mut series = Vec::with_capacity(chart.prices.len());
        for (idx, (ts, price)) in chart.prices.iter().enumerate() {
            let Some(date) = date_from_millis(*ts as i64) else {
                continue;
            };
            let market_cap = chart.market_caps.get(idx).and_then(|(_, v)| *v);

            series.push(MarketMetrics {
                coin_id: id.to_string(),
                date: Some(date),
                price: *price,
                market_cap,
                circulating_supply: None,
                total_supply: None,
                max_supply: None,
            });
        }
        series
    }
}

#[async_trait]
impl AggregatorProvider for CoinGeckoClient {
    async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
        info!("Fetching aggregator coin catalog...");
        let url = format!("{}/coins/list", self.base_url);

        let entries: Vec<CoinListEntry> =
            with_retry(&self.retry, &self.limiter, "coins_list", || {
                self.get_json(&url)
            })
            .await?;

        info!("Catalog holds {} coins", entries.len());
        Ok(entries
            .into_iter()
            .map(|e| CatalogEntry {
                id: e.id,
                symbol: e.symbol,
                name: e.name,
            })
            .collect())
    }

    async fn get_market_metrics(&self, ids: &[String]) -> Result<HashMap<String, MarketMetrics>> {
        let mut metrics = HashMap::new();

        for batch in ids.chunks(self.batch_size) {
            let url = format!(
                "{}/coins/markets?vs_currency=usd&ids={}&per_page={}&page=1&sparkline=false",
                self.base_url,
                batch.join(","),
                self.batch_size
            );

            let rows: Vec<MarketRow> =
                with_retry(&self.retry, &self.limiter, "coins_markets", || {
                    self.get_json(&url)
                })
                .await?;

            for row in rows {
                metrics.insert(
                    row.id.clone(),
                    MarketMetrics {
                        coin_id: row.id,
                        date: None,
                        price: row.current_price,
                        market_cap: row.market_cap,
                        circulating_supply: row.circulating_supply,
                        total_supply: row.total_supply,
                        max_supply: row.max_supply,
                    },
                );
            }
        }

        debug!("Fetched market metrics for {} coins", metrics.len());
        Ok(metrics)
    }

    async fn get_historical_series(&self, id: &str, days: u32) -> Result<Vec<MarketMetrics>> {
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}&interval=daily",
            self.base_url, id, days
        );

        let chart: MarketChartResponse =
            with_retry(&self.retry, &self.limiter, "market_chart", || {
                self.get_json(&url)
            })
            .await?;

        let series = Self::series_from_chart(id, chart);
        debug!("Fetched {} daily metrics for {}", series.len(), id);
        Ok(series)
    }
}
