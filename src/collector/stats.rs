/// Collection run report
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Totals for one collection run. Always produced when a run completes,
/// even when some symbols were skipped or failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Trading pairs discovered (after any filter/cap).
    pub discovered: usize,
    /// Symbols that produced at least one enriched row this run.
    pub collected: usize,
    /// Symbols skipped because a prior checkpoint already covered them.
    pub resumed: usize,
    /// Rows in the persisted result set after the terminal merge.
    pub rows_written: usize,
    /// Symbols with no aggregator mapping (expected, not an error).
    pub skipped_unmapped: Vec<String>,
    /// Symbols that mapped but yielded no usable metrics.
    pub skipped_no_metrics: Vec<String>,
    /// Symbols that failed after exhausting retries.
    pub failed: Vec<String>,
    /// Wall-clock duration of the run.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success_rate(&self) -> f64 {
        if self.discovered == 0 {
            0.0
        } else {
            (self.collected as f64 / self.discovered as f64) * 100.0
        }
    }

    /// Log the run summary in one place.
    pub fn log_summary(&self, operation: &str) {
        info!("✅ {} complete:", operation);
        info!("   Discovered: {} pairs", self.discovered);
        info!("   Collected: {} symbols ({:.1}%)", self.collected, self.success_rate());
        if self.resumed > 0 {
            info!("   Resumed from checkpoint: {} symbols", self.resumed);
        }
        info!("   Rows written: {}", self.rows_written);
        info!("   Elapsed: {:.1}s", self.elapsed.as_secs_f64());

        if !self.skipped_unmapped.is_empty() {
            warn!(
                "   Unmapped (skipped): {} symbols: {}",
                self.skipped_unmapped.len(),
                preview(&self.skipped_unmapped)
            );
        }
        if !self.skipped_no_metrics.is_empty() {
            warn!(
                "   No usable metrics (skipped): {} symbols: {}",
                self.skipped_no_metrics.len(),
                preview(&self.skipped_no_metrics)
            );
        }
        if !self.failed.is_empty() {
            warn!(
                "   Failed after retries: {} symbols: {}",
                self.failed.len(),
                preview(&self.failed)
            );
        }
    }
}

fn preview(symbols: &[String]) -> String {
    const SHOWN: usize = 10;
    if symbols.len() <= SHOWN {
        symbols.join(", ")
    } else {
        format!("{}, ... ({} more)", symbols[..SHOWN].join(", "), symbols.len() - SHOWN)
    }
}
