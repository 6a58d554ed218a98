/// Persisted EOD result set - CSV merge target
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::EnrichedRecord;

/// Summary of the persisted result set (for the stats surface).
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub total_records: usize,
    pub unique_symbols: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// CSV-backed store for EnrichedRecords.
///
/// Merging de-duplicates on (date, symbol) keeping the last-seen value,
/// orders rows by (symbol, date), and publishes atomically via
/// write-to-temp-then-rename, so a crashed write never corrupts the
/// previous result set.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: PathBuf) -> Self {
        RecordStore { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the persisted result set; an absent file is an empty set.
    pub async fn load(&self) -> Result<Vec<EnrichedRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut records = Vec::new();
        for row in reader.deserialize::<EnrichedRecord>() {
            records.push(row?);
        }
        debug!("Loaded {} rows from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Merge `new_rows` into the persisted set and rewrite it.
    ///
    /// Existing rows come first, so newly fetched values win on duplicate
    /// (date, symbol) keys. Returns the total rows written.
    pub async fn merge_and_write(&self, new_rows: &[EnrichedRecord]) -> Result<usize> {
        let existing = self.load().await?;

        let mut merged: BTreeMap<(String, NaiveDate), EnrichedRecord> = BTreeMap::new();
        for record in existing.into_iter().chain(new_rows.iter().cloned()) {
            merged.insert((record.symbol.clone(), record.date), record);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in merged.values() {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| crate::error::CollectError::Other(format!("CSV flush failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!("Wrote {} rows to {}", merged.len(), self.path.display());
        Ok(merged.len())
    }

    /// Summary statistics of the persisted result set.
    pub async fn summary(&self) -> Result<StoreSummary> {
        let records = self.load().await?;

        let mut symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
        symbols.sort_unstable();
        symbols.dedup();

        Ok(StoreSummary {
            total_records: records.len(),
            unique_symbols: symbols.len(),
            first_date: records.iter().map(|r| r.date).min(),
            last_date: records.iter().map(|r| r.date).max(),
        })
    }
}
