/// Symbol reconciliation between exchange tickers and aggregator ids
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::providers::AggregatorProvider;
use crate::types::CatalogEntry;

/// Well-known tickers whose aggregator id cannot be picked from the catalog
/// by symbol alone (many tokens squat popular tickers).
const OVERRIDES: &[(&str, &str)] = &[
    ("BNB", "binancecoin"),
    ("WBTC", "wrapped-bitcoin"),
    ("WETH", "weth"),
    ("SHIB", "shiba-inu"),
    ("DOGE", "dogecoin"),
    ("MATIC", "matic-network"),
];

#[derive(Debug, Serialize, Deserialize, Default)]
struct MappingCacheFile {
    refreshed_at: Option<DateTime<Utc>>,
    mappings: HashMap<String, String>,
}

struct MapperState {
    mappings: HashMap<String, String>,
    refreshed_at: Option<DateTime<Utc>>,
    // Uppercased symbol -> catalog candidates; in-memory only, rebuilt on
    // each whole-catalog refresh
    catalog_index: HashMap<String, Vec<CatalogEntry>>,
}

/// Resolves exchange base assets to aggregator identifiers.
///
/// Resolved mappings persist in a JSON cache file so repeat runs skip the
/// catalog entirely. The catalog itself is re-pulled as a whole (the
/// aggregator has no delta endpoint), lazily on the first unmapped lookup,
/// and again once the cache outlives its TTL.
pub struct SymbolMapper<A> {
    aggregator: Arc<A>,
    cache_file: PathBuf,
    ttl_hours: i64,
    clock: fn() -> DateTime<Utc>,
    state: RwLock<MapperState>,
}

impl<A: AggregatorProvider> SymbolMapper<A> {
    /// Create a mapper, loading any persisted cache. A missing or malformed
    /// cache file is treated as empty (forces a catalog refresh), never an
    /// error.
    pub fn load(aggregator: Arc<A>, cache_file: PathBuf, ttl_hours: i64) -> Self {
        let cached = match std::fs::read_to_string(&cache_file) {
            Ok(content) => match serde_json::from_str::<MappingCacheFile>(&content) {
                Ok(cached) => {
                    info!("Loaded {} cached symbol mappings", cached.mappings.len());
                    cached
                }
                Err(e) => {
                    warn!("Symbol mapping cache malformed ({}), starting empty", e);
                    MappingCacheFile::default()
                }
            },
            Err(_) => MappingCacheFile::default(),
        };

        SymbolMapper {
            aggregator,
            cache_file,
            ttl_hours,
            clock: Utc::now,
            state: RwLock::new(MapperState {
                mappings: cached.mappings,
                refreshed_at: cached.refreshed_at,
                catalog_index: HashMap::new(),
            }),
        }
    }

    /// Replace the expiry clock (tests).
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve a base asset to its aggregator id.
    ///
    /// `Ok(None)` is the expected outcome for delisted or unmapped assets;
    /// only a failed catalog refresh is an error.
    pub async fn resolve(&self, base_asset: &str) -> Result<Option<String>> {
        let key = base_asset.to_uppercase();

        {
            let state = self.state.read().await;
            if let Some(id) = state.mappings.get(&key) {
                return Ok(Some(id.clone()));
            }
        }

        if let Some((_, id)) = OVERRIDES.iter().find(|(sym, _)| *sym == key) {
            let mut state = self.state.write().await;
            state.mappings.insert(key, id.to_string());
            return Ok(Some(id.to_string()));
        }

        self.ensure_catalog().await?;

        let resolved = {
            let state = self.state.read().await;
            state
                .catalog_index
                .get(&key)
                .filter(|candidates| !candidates.is_empty())
                .map(|candidates| Self::pick_best(&key, candidates).id.clone())
        };

        match resolved {
            Some(id) => {
                debug!("Mapped {} -> {}", key, id);
                let mut state = self.state.write().await;
                state.mappings.insert(key, id.clone());
                Ok(Some(id))
            }
            None => {
                debug!("No aggregator id for {}", key);
                Ok(None)
            }
        }
    }

    /// Base assets already resolved in this or a prior run.
    pub async fn known_bases(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.mappings.keys().cloned().collect()
    }

    /// Persist the mapping cache atomically (write-to-temp-then-rename).
    pub async fn save(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            MappingCacheFile {
                refreshed_at: state.refreshed_at,
                mappings: state.mappings.clone(),
            }
        };

        if let Some(parent) = self.cache_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.cache_file.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.cache_file).await?;

        debug!(
            "Saved {} symbol mappings to {}",
            snapshot.mappings.len(),
            self.cache_file.display()
        );
        Ok(())
    }

    /// Pull the full catalog when it is missing or past its TTL.
    async fn ensure_catalog(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if !state.catalog_index.is_empty() && !self.is_stale(state.refreshed_at) {
                return Ok(());
            }
        }

        info!("Refreshing symbol catalog...");
        let catalog = self.aggregator.list_catalog().await?;

        let mut index: HashMap<String, Vec<CatalogEntry>> = HashMap::new();
        for entry in catalog {
            index
                .entry(entry.symbol.to_uppercase())
                .or_default()
                .push(entry);
        }

        let mut state = self.state.write().await;
        state.catalog_index = index;
        state.refreshed_at = Some((self.clock)());
        info!("Catalog indexed: {} distinct symbols", state.catalog_index.len());
        Ok(())
    }

    fn is_stale(&self, refreshed_at: Option<DateTime<Utc>>) -> bool {
        match refreshed_at {
            None => true,
            Some(at) => ((self.clock)() - at).num_hours() >= self.ttl_hours,
        }
    }

    /// Deterministic tie-break for symbol collisions: prefer the entry whose
    /// name equals the symbol, then the entry whose id is the lowercased
    /// symbol, then the lexicographically smallest id.
    fn pick_best<'a>(symbol: &str, candidates: &'a [CatalogEntry]) -> &'a CatalogEntry {
        candidates
            .iter()
            .min_by_key(|c| {
                (
                    !c.name.eq_ignore_ascii_case(symbol),
                    c.id != symbol.to_lowercase(),
                    c.id.clone(),
                )
            })
            .expect("candidates checked non-empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::MarketMetrics;

    struct StubCatalog {
        entries: Vec<CatalogEntry>,
        calls: AtomicU32,
    }

    impl StubCatalog {
        fn new(entries: Vec<(&str, &str, &str)>) -> Self {
            StubCatalog {
                entries: entries
                    .into_iter()
                    .map(|(id, symbol, name)| CatalogEntry {
                        id: id.to_string(),
                        symbol: symbol.to_string(),
                        name: name.to_string(),
                    })
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AggregatorProvider for StubCatalog {
        async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.clone())
        }

        async fn get_market_metrics(
            &self,
            _ids: &[String],
        ) -> Result<StdHashMap<String, MarketMetrics>> {
            Ok(StdHashMap::new())
        }

        async fn get_historical_series(&self, _id: &str, _days: u32) -> Result<Vec<MarketMetrics>> {
            Ok(Vec::new())
        }
    }

    fn temp_cache_file() -> PathBuf {
        std::env::temp_dir().join(format!("mapping-test-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_resolve_is_deterministic_and_cached() {
        let aggregator = Arc::new(StubCatalog::new(vec![(
            "bitcoin", "btc", "Bitcoin",
        )]));
        let mapper = SymbolMapper::load(Arc::clone(&aggregator), temp_cache_file(), 24);

        let first = mapper.resolve("BTC").await.unwrap();
        let second = mapper.resolve("BTC").await.unwrap();

        assert_eq!(first, Some("bitcoin".to_string()));
        assert_eq!(first, second);
        // Second lookup came from cache: the catalog was pulled exactly once
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_override_table_skips_catalog() {
        let aggregator = Arc::new(StubCatalog::new(vec![]));
        let mapper = SymbolMapper::load(Arc::clone(&aggregator), temp_cache_file(), 24);

        let id = mapper.resolve("BNB").await.unwrap();
        assert_eq!(id, Some("binancecoin".to_string()));
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tie_break_prefers_name_match() {
        let aggregator = Arc::new(StubCatalog::new(vec![
            ("zzz-protocol", "arb", "ZZZ Protocol"),
            ("arbitrum", "arb", "Arb"),
            ("aaa-arb-token", "arb", "AAA Token"),
        ]));
        let mapper = SymbolMapper::load(aggregator, temp_cache_file(), 24);

        let id = mapper.resolve("ARB").await.unwrap();
        assert_eq!(id, Some("arbitrum".to_string()));
    }

    #[tokio::test]
    async fn test_unmapped_returns_none() {
        let aggregator = Arc::new(StubCatalog::new(vec![("bitcoin", "btc", "Bitcoin")]));
        let mapper = SymbolMapper::load(aggregator, temp_cache_file(), 24);

        assert_eq!(mapper.resolve("XYZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_survives_restart() {
        let cache_file = temp_cache_file();

        let aggregator = Arc::new(StubCatalog::new(vec![("ethereum", "eth", "Ethereum")]));
        let mapper = SymbolMapper::load(Arc::clone(&aggregator), cache_file.clone(), 24);
        mapper.resolve("ETH").await.unwrap();
        mapper.save().await.unwrap();

        // Fresh mapper, empty catalog: the hit must come from the file
        let empty = Arc::new(StubCatalog::new(vec![]));
        let reloaded = SymbolMapper::load(Arc::clone(&empty), cache_file.clone(), 24);
        assert_eq!(
            reloaded.resolve("ETH").await.unwrap(),
            Some("ethereum".to_string())
        );
        assert_eq!(empty.calls.load(Ordering::SeqCst), 0);

        let _ = std::fs::remove_file(cache_file);
    }

    #[tokio::test]
    async fn test_corrupt_cache_treated_as_miss() {
        let cache_file = temp_cache_file();
        std::fs::write(&cache_file, "{not json").unwrap();

        let aggregator = Arc::new(StubCatalog::new(vec![("bitcoin", "btc", "Bitcoin")]));
        let mapper = SymbolMapper::load(Arc::clone(&aggregator), cache_file.clone(), 24);

        assert_eq!(
            mapper.resolve("BTC").await.unwrap(),
            Some("bitcoin".to_string())
        );
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_file(cache_file);
    }

    #[tokio::test]
    async fn test_stale_catalog_is_repulled() {
        fn far_future() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()
        }

        let aggregator = Arc::new(StubCatalog::new(vec![("bitcoin", "btc", "Bitcoin")]));
        let mapper = SymbolMapper::load(Arc::clone(&aggregator), temp_cache_file(), 24);

        mapper.resolve("BTC").await.unwrap();
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 1);

        // Catalog now far past its TTL: the next unmapped lookup re-pulls it
        let mapper = mapper.with_clock(far_future);
        assert_eq!(mapper.resolve("NOPE").await.unwrap(), None);
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 2);
    }
}
