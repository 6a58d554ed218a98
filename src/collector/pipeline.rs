/// Checkpointing collection pipeline over the full symbol universe
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::collector::CollectionReport;
use crate::data::{CheckpointStore, Cursor, RecordStore, RunStatus};
use crate::enrich;
use crate::error::Result;
use crate::mapping::SymbolMapper;
use crate::providers::{AggregatorProvider, ExchangeProvider};
use crate::types::{Config, EnrichedRecord, MarketMetrics, TradingPair};
use crate::utils::today_utc;

/// Orchestrates a full pass over the discovered symbol universe: mapping
/// lookup, provider fetches, enrichment, and periodic checkpoint flushes.
///
/// Per-symbol failures are logged and counted, never abort the run. Only
/// resource-level failures propagate: discovery or catalog unreachable,
/// or a checkpoint that cannot be written.
pub struct EodCollector<E, A> {
    exchange: Arc<E>,
    aggregator: Arc<A>,
    mapper: Arc<SymbolMapper<A>>,
    checkpoint: CheckpointStore,
    store: RecordStore,
    config: Arc<Config>,
}

impl<E: ExchangeProvider, A: AggregatorProvider> EodCollector<E, A> {
    pub fn new(
        exchange: Arc<E>,
        aggregator: Arc<A>,
        mapper: Arc<SymbolMapper<A>>,
        config: Arc<Config>,
    ) -> Self {
        let data_dir = PathBuf::from(&config.data_dir);
        EodCollector {
            exchange,
            aggregator,
            mapper,
            checkpoint: CheckpointStore::new(&data_dir),
            store: RecordStore::new(data_dir.join(&config.output_file)),
            config,
        }
    }

    /// The persisted result set this collector writes to.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Collect `days` of daily history for every discovered pair, resuming
    /// from an interrupted checkpoint when one exists.
    pub async fn collect_historical(
        &self,
        days: u32,
        symbol_filter: Option<&[String]>,
        max_symbols: Option<usize>,
    ) -> Result<CollectionReport> {
        let started = Instant::now();
        info!("📊 Starting historical collection ({} days)...", days);

        let mut report = CollectionReport::new();

        // Discovering: the universe is fetched once per run, in a stable
        // order; discovery failure terminates the run
        let pairs = self.discover(symbol_filter, max_symbols).await?;
        report.discovered = pairs.len();

        // Resume from a prior interrupted run, if any
        let (mut accumulated, completed, run_id, mut processed) =
            match self.checkpoint.load().await? {
                Some(resume) => {
                    info!(
                        "🔄 Resuming run {}: {} symbols already done",
                        resume.cursor.run_id,
                        resume.completed_symbols.len()
                    );
                    (
                        resume.records,
                        resume.completed_symbols,
                        resume.cursor.run_id,
                        resume.cursor.symbols_processed,
                    )
                }
                None => {
                    self.checkpoint.clear().await?;
                    (Vec::new(), HashSet::new(), uuid::Uuid::new_v4().to_string(), 0)
                }
            };

        let to = today_utc();
        let from = to - Duration::days(days as i64);
        let mut pending: Vec<EnrichedRecord> = Vec::new();

        for (i, pair) in pairs.iter().enumerate() {
            if completed.contains(&pair.symbol) {
                report.resumed += 1;
                continue;
            }

            info!(
                "Processing {}/{}: {} ({})",
                i + 1,
                pairs.len(),
                pair.symbol,
                pair.base_asset
            );

            // MappingLookup: NotFound is an expected skip, not an error
            let coin_id = match self.mapper.resolve(&pair.base_asset).await? {
                Some(id) => id,
                None => {
                    warn!("No aggregator mapping for {}, skipping {}", pair.base_asset, pair.symbol);
                    report.skipped_unmapped.push(pair.symbol.clone());
                    continue;
                }
            };

            // Fetch: per-symbol failures downgrade to a skip
            let candles = match self.exchange.get_daily_candles(&pair.symbol, from, to).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Candle fetch failed for {}: {}", pair.symbol, e);
                    report.failed.push(pair.symbol.clone());
                    continue;
                }
            };

            let series = match self.aggregator.get_historical_series(&coin_id, days).await {
                Ok(series) => series,
                Err(e) => {
                    warn!("Metrics fetch failed for {} ({}): {}", pair.symbol, coin_id, e);
                    report.failed.push(pair.symbol.clone());
                    continue;
                }
            };

            // Enrich: align by date, drop candles without usable metrics
            let rows = Self::enrich_series(pair, &coin_id, &candles, &series);
            if rows.is_empty() {
                warn!("No usable metrics for {} ({}), skipping", pair.symbol, coin_id);
                report.skipped_no_metrics.push(pair.symbol.clone());
            } else {
                debug!("{}: {} enriched rows", pair.symbol, rows.len());
                pending.extend(rows);
                report.collected += 1;
            }
            processed += 1;

            // Flushing: persist progress every N symbols
            if processed % self.config.checkpoint_interval == 0 {
                self.flush(&mut pending, &mut accumulated, &run_id, processed, &pair.symbol)
                    .await?;
            }
        }

        // Final flush and terminal de-duplicating write
        let last_symbol = pairs.last().map(|p| p.symbol.clone()).unwrap_or_default();
        self.flush(&mut pending, &mut accumulated, &run_id, processed, &last_symbol)
            .await?;

        report.rows_written = self.store.merge_and_write(&accumulated).await?;

        self.checkpoint
            .write_cursor(&Cursor {
                run_id,
                symbols_processed: processed,
                last_symbol,
                status: RunStatus::Completed,
                updated_at: chrono::Utc::now(),
            })
            .await?;

        report.elapsed = started.elapsed();
        report.log_summary("Historical collection");
        Ok(report)
    }

    /// Fetch only the current day's snapshot per known symbol, with one
    /// batched metrics call across the mapped universe, then append and
    /// de-duplicate against the persisted result set.
    pub async fn collect_daily_update(
        &self,
        symbol_filter: Option<&[String]>,
    ) -> Result<CollectionReport> {
        let started = Instant::now();
        info!("📊 Starting daily update...");

        let mut report = CollectionReport::new();

        let mut pairs = self.discover(symbol_filter, None).await?;

        // The daily pass works off the prior run's mapping cache; on a cold
        // start (no cache yet) every discovered pair is resolved fresh
        let known: HashSet<String> = self.mapper.known_bases().await.into_iter().collect();
        if !known.is_empty() {
            pairs.retain(|p| known.contains(&p.base_asset.to_uppercase()));
            info!("Restricted to {} pairs with known mappings", pairs.len());
        }
        report.discovered = pairs.len();

        // MappingLookup across the universe first, so metrics can be batched
        let mut mapped: Vec<(TradingPair, String)> = Vec::new();
        for pair in pairs {
            match self.mapper.resolve(&pair.base_asset).await? {
                Some(id) => mapped.push((pair, id)),
                None => {
                    warn!("No aggregator mapping for {}, skipping {}", pair.base_asset, pair.symbol);
                    report.skipped_unmapped.push(pair.symbol);
                }
            }
        }

        // One batched metrics call for the whole mapped universe; total
        // aggregator failure here is resource-level and terminates the run
        let ids: Vec<String> = {
            let mut seen = HashSet::new();
            mapped
                .iter()
                .map(|(_, id)| id.clone())
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };
        let metrics = self.aggregator.get_market_metrics(&ids).await?;

        let mut rows: Vec<EnrichedRecord> = Vec::new();
        for (pair, coin_id) in &mapped {
            let snapshot = match self.exchange.get_24h_snapshot(&pair.symbol).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Snapshot fetch failed for {}: {}", pair.symbol, e);
                    report.failed.push(pair.symbol.clone());
                    continue;
                }
            };

            match metrics.get(coin_id) {
                Some(m) => match enrich::merge(&snapshot, pair, coin_id, m) {
                    Ok(record) => {
                        rows.push(record);
                        report.collected += 1;
                    }
                    Err(reason) => {
                        warn!("{}: excluded ({})", pair.symbol, reason.as_str());
                        report.skipped_no_metrics.push(pair.symbol.clone());
                    }
                },
                None => {
                    warn!("No current metrics for {} ({})", pair.symbol, coin_id);
                    report.skipped_no_metrics.push(pair.symbol.clone());
                }
            }
        }

        report.rows_written = self.store.merge_and_write(&rows).await?;
        self.mapper.save().await?;

        report.elapsed = started.elapsed();
        report.log_summary("Daily update");
        Ok(report)
    }

    /// Discover the trading-pair universe, optionally filtered to a subset
    /// or capped for test runs.
    async fn discover(
        &self,
        symbol_filter: Option<&[String]>,
        max_symbols: Option<usize>,
    ) -> Result<Vec<TradingPair>> {
        let mut pairs = self.exchange.list_active_pairs().await?;

        if let Some(filter) = symbol_filter {
            let wanted: HashSet<&str> = filter.iter().map(|s| s.as_str()).collect();
            pairs.retain(|p| wanted.contains(p.symbol.as_str()));
            info!("Symbol filter applied: {} pairs", pairs.len());
        }

        if let Some(cap) = max_symbols {
            if pairs.len() > cap {
                pairs.truncate(cap);
                info!("Capped universe to first {} pairs", cap);
            }
        }

        Ok(pairs)
    }

    /// Merge candles with their same-date metrics, dropping candles that
    /// have no usable metrics for that day.
    fn enrich_series(
        pair: &TradingPair,
        coin_id: &str,
        candles: &[crate::types::OhlcvRecord],
        series: &[MarketMetrics],
    ) -> Vec<EnrichedRecord> {
        let by_date: HashMap<NaiveDate, &MarketMetrics> = series
            .iter()
            .filter_map(|m| m.date.map(|d| (d, m)))
            .collect();

        let mut rows = Vec::new();
        for candle in candles {
            let Some(metrics) = by_date.get(&candle.date) else {
                continue;
            };
            match enrich::merge(candle, pair, coin_id, metrics) {
                Ok(record) => rows.push(record),
                Err(reason) => {
                    debug!("{} {}: excluded ({})", pair.symbol, candle.date, reason.as_str());
                }
            }
        }
        rows
    }

    /// Persist progress: append pending rows to the checkpoint log, publish
    /// the cursor, and save the mapping cache. Failure here is fatal; the
    /// prior checkpoint remains valid.
    async fn flush(
        &self,
        pending: &mut Vec<EnrichedRecord>,
        accumulated: &mut Vec<EnrichedRecord>,
        run_id: &str,
        processed: usize,
        last_symbol: &str,
    ) -> Result<()> {
        self.checkpoint.append(pending).await?;
        accumulated.extend(pending.drain(..));

        self.checkpoint
            .write_cursor(&Cursor {
                run_id: run_id.to_string(),
                symbols_processed: processed,
                last_symbol: last_symbol.to_string(),
                status: RunStatus::Running,
                updated_at: chrono::Utc::now(),
            })
            .await?;

        self.mapper.save().await?;

        info!(
            "💾 Checkpoint saved: {} symbols processed, {} rows accumulated",
            processed,
            accumulated.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::CollectError;
    use crate::types::{CatalogEntry, OhlcvRecord};

    struct StubExchange {
        pairs: Vec<TradingPair>,
        candles: HashMap<String, Vec<OhlcvRecord>>,
        snapshots: HashMap<String, OhlcvRecord>,
        fail_candles: HashSet<String>,
        candle_calls: Mutex<Vec<String>>,
    }

    impl StubExchange {
        fn new(pairs: Vec<TradingPair>) -> Self {
            StubExchange {
                pairs,
                candles: HashMap::new(),
                snapshots: HashMap::new(),
                fail_candles: HashSet::new(),
                candle_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExchangeProvider for StubExchange {
        async fn list_active_pairs(&self) -> Result<Vec<TradingPair>> {
            Ok(self.pairs.clone())
        }

        async fn get_daily_candles(
            &self,
            symbol: &str,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<OhlcvRecord>> {
            self.candle_calls.lock().unwrap().push(symbol.to_string());
            if self.fail_candles.contains(symbol) {
                return Err(CollectError::ApiError {
                    status: 500,
                    message: "persistent failure".to_string(),
                });
            }
            Ok(self.candles.get(symbol).cloned().unwrap_or_default())
        }

        async fn get_24h_snapshot(&self, symbol: &str) -> Result<OhlcvRecord> {
            self.snapshots
                .get(symbol)
                .cloned()
                .ok_or_else(|| CollectError::ApiError {
                    status: 500,
                    message: "no snapshot".to_string(),
                })
        }
    }

    struct StubAggregator {
        catalog: Vec<CatalogEntry>,
        series: HashMap<String, Vec<MarketMetrics>>,
        metrics: HashMap<String, MarketMetrics>,
    }

    #[async_trait]
    impl AggregatorProvider for StubAggregator {
        async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
            Ok(self.catalog.clone())
        }

        async fn get_market_metrics(
            &self,
            ids: &[String],
        ) -> Result<HashMap<String, MarketMetrics>> {
            Ok(self
                .metrics
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, m)| (id.clone(), m.clone()))
                .collect())
        }

        async fn get_historical_series(&self, id: &str, _days: u32) -> Result<Vec<MarketMetrics>> {
            Ok(self.series.get(id).cloned().unwrap_or_default())
        }
    }

    fn pair(symbol: &str, base: &str) -> TradingPair {
        TradingPair {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: "USDT".to_string(),
        }
    }

    fn entry(id: &str, symbol: &str, name: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }

    fn candle(symbol: &str, date: NaiveDate, close: f64) -> OhlcvRecord {
        OhlcvRecord {
            date,
            symbol: symbol.to_string(),
            open: close * 0.99,
            high: close * 1.01,
            low: close * 0.98,
            close,
            volume: 1000.0,
            quote_volume: 1000.0 * close,
            trade_count: 500,
        }
    }

    fn daily_metrics(id: &str, date: NaiveDate, cap: f64) -> MarketMetrics {
        MarketMetrics {
            coin_id: id.to_string(),
            date: Some(date),
            price: Some(cap / 1000.0),
            market_cap: Some(cap),
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
        }
    }

    fn test_config(dir: &std::path::Path, checkpoint_interval: usize) -> Arc<Config> {
        let mut config = Config::default();
        config.data_dir = dir.to_string_lossy().to_string();
        config.checkpoint_interval = checkpoint_interval;
        Arc::new(config)
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pipeline-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Two days of history for BTC and ETH; XYZ trades on the exchange but
    /// has no aggregator identity.
    fn fixtures() -> (StubExchange, StubAggregator) {
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();

        let mut exchange = StubExchange::new(vec![
            pair("BTCUSDT", "BTC"),
            pair("ETHUSDT", "ETH"),
            pair("XYZUSDT", "XYZ"),
        ]);
        exchange.candles.insert(
            "BTCUSDT".to_string(),
            vec![candle("BTCUSDT", d1, 67000.0), candle("BTCUSDT", d2, 68000.0)],
        );
        exchange.candles.insert(
            "ETHUSDT".to_string(),
            vec![candle("ETHUSDT", d1, 3500.0), candle("ETHUSDT", d2, 3600.0)],
        );
        exchange.candles.insert(
            "XYZUSDT".to_string(),
            vec![candle("XYZUSDT", d1, 1.0), candle("XYZUSDT", d2, 1.1)],
        );

        let mut series = HashMap::new();
        series.insert(
            "bitcoin".to_string(),
            vec![
                daily_metrics("bitcoin", d1, 1.30e12),
                daily_metrics("bitcoin", d2, 1.32e12),
            ],
        );
        series.insert(
            "ethereum".to_string(),
            vec![
                daily_metrics("ethereum", d1, 4.2e11),
                daily_metrics("ethereum", d2, 4.3e11),
            ],
        );

        let aggregator = StubAggregator {
            catalog: vec![
                entry("bitcoin", "btc", "Bitcoin"),
                entry("ethereum", "eth", "Ethereum"),
            ],
            series,
            metrics: HashMap::new(),
        };

        (exchange, aggregator)
    }

    fn collector(
        exchange: StubExchange,
        aggregator: StubAggregator,
        dir: &std::path::Path,
        checkpoint_interval: usize,
    ) -> EodCollector<StubExchange, StubAggregator> {
        let config = test_config(dir, checkpoint_interval);
        let aggregator = Arc::new(aggregator);
        let mapper = Arc::new(SymbolMapper::load(
            Arc::clone(&aggregator),
            dir.join("symbol_mapping.json"),
            24,
        ));
        EodCollector::new(Arc::new(exchange), aggregator, mapper, config)
    }

    #[tokio::test]
    async fn test_unmapped_symbols_are_skipped_not_fatal() {
        let dir = temp_dir();
        let (exchange, aggregator) = fixtures();
        let collector = collector(exchange, aggregator, &dir, 50);

        let report = collector.collect_historical(2, None, None).await.unwrap();

        assert_eq!(report.discovered, 3);
        assert_eq!(report.collected, 2);
        assert_eq!(report.skipped_unmapped, vec!["XYZUSDT".to_string()]);
        assert!(report.failed.is_empty());

        let rows = collector.store().load().await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.symbol != "XYZUSDT"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_failed_symbol_downgrades_to_skip() {
        let dir = temp_dir();
        let (mut exchange, aggregator) = fixtures();
        exchange.fail_candles.insert("ETHUSDT".to_string());
        let collector = collector(exchange, aggregator, &dir, 50);

        let report = collector.collect_historical(2, None, None).await.unwrap();

        assert_eq!(report.failed, vec!["ETHUSDT".to_string()]);
        assert_eq!(report.collected, 1);

        // The run still completed and wrote the healthy symbol
        let rows = collector.store().load().await.unwrap();
        assert!(rows.iter().all(|r| r.symbol == "BTCUSDT"));
        assert_eq!(rows.len(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_symbol_filter_restricts_universe() {
        let dir = temp_dir();
        let (exchange, aggregator) = fixtures();
        let collector = collector(exchange, aggregator, &dir, 50);

        let filter = vec!["BTCUSDT".to_string()];
        let report = collector
            .collect_historical(2, Some(&filter), None)
            .await
            .unwrap();

        assert_eq!(report.discovered, 1);
        assert_eq!(report.collected, 1);
        assert_eq!(report.rows_written, 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_symbols_and_matches_full_run() {
        // Uninterrupted reference run
        let full_dir = temp_dir();
        let (exchange, aggregator) = fixtures();
        let reference = collector(exchange, aggregator, &full_dir, 1);
        reference.collect_historical(2, None, None).await.unwrap();
        let full_rows = reference.store().load().await.unwrap();

        // Interrupted run: BTCUSDT was flushed before the interrupt
        let dir = temp_dir();
        let btc_rows: Vec<EnrichedRecord> = full_rows
            .iter()
            .filter(|r| r.symbol == "BTCUSDT")
            .cloned()
            .collect();
        assert_eq!(btc_rows.len(), 2);

        let checkpoint = CheckpointStore::new(&dir);
        checkpoint.append(&btc_rows).await.unwrap();
        checkpoint
            .write_cursor(&Cursor {
                run_id: uuid::Uuid::new_v4().to_string(),
                symbols_processed: 1,
                last_symbol: "BTCUSDT".to_string(),
                status: RunStatus::Running,
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let (exchange, aggregator) = fixtures();
        let resumed = collector(exchange, aggregator, &dir, 1);
        let report = resumed.collect_historical(2, None, None).await.unwrap();

        assert_eq!(report.resumed, 1);
        // The already-checkpointed symbol was not re-fetched
        let calls = resumed.exchange.candle_calls.lock().unwrap().clone();
        assert!(!calls.contains(&"BTCUSDT".to_string()));

        // Final result set matches the uninterrupted run on (date, symbol)
        let resumed_rows = resumed.store().load().await.unwrap();
        let keys = |rows: &[EnrichedRecord]| -> HashSet<(NaiveDate, String)> {
            rows.iter().map(|r| r.key()).collect()
        };
        assert_eq!(keys(&resumed_rows), keys(&full_rows));

        let _ = std::fs::remove_dir_all(full_dir);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_rerun_after_completion_is_idempotent() {
        let dir = temp_dir();
        let (exchange, aggregator) = fixtures();
        let collector1 = collector(exchange, aggregator, &dir, 1);
        collector1.collect_historical(2, None, None).await.unwrap();
        let first = std::fs::read(collector1.store().path()).unwrap();

        let (exchange, aggregator) = fixtures();
        let collector2 = collector(exchange, aggregator, &dir, 1);
        collector2.collect_historical(2, None, None).await.unwrap();
        let second = std::fs::read(collector2.store().path()).unwrap();

        assert_eq!(first, second);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_daily_update_appends_and_dedups() {
        let dir = temp_dir();
        let (mut exchange, mut aggregator) = fixtures();

        let today = today_utc();
        exchange
            .snapshots
            .insert("BTCUSDT".to_string(), candle("BTCUSDT", today, 69000.0));
        exchange
            .snapshots
            .insert("ETHUSDT".to_string(), candle("ETHUSDT", today, 3700.0));
        aggregator.metrics.insert(
            "bitcoin".to_string(),
            MarketMetrics {
                coin_id: "bitcoin".to_string(),
                date: None,
                price: Some(69000.0),
                market_cap: Some(1.35e12),
                circulating_supply: Some(19_845_000.0),
                total_supply: None,
                max_supply: None,
            },
        );
        aggregator.metrics.insert(
            "ethereum".to_string(),
            MarketMetrics {
                coin_id: "ethereum".to_string(),
                date: None,
                price: Some(3700.0),
                market_cap: None,
                circulating_supply: Some(120_000_000.0),
                total_supply: None,
                max_supply: None,
            },
        );

        let collector = collector(exchange, aggregator, &dir, 50);
        let report = collector.collect_daily_update(None).await.unwrap();

        assert_eq!(report.collected, 2);
        assert_eq!(report.skipped_unmapped, vec!["XYZUSDT".to_string()]);

        let rows = collector.store().load().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.date == today));
        // ETH had no provider cap: derived from price x supply and flagged
        let eth = rows.iter().find(|r| r.symbol == "ETHUSDT").unwrap();
        assert!(eth.market_cap_derived);
        assert_eq!(eth.market_cap, 3700.0 * 120_000_000.0);

        // Re-running the update replaces rather than duplicates the rows
        let report2 = collector.collect_daily_update(None).await.unwrap();
        assert_eq!(report2.rows_written, 2);

        let _ = std::fs::remove_dir_all(dir);
    }
}
