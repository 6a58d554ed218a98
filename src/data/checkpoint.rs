/// Durable checkpoint for long collection runs - JSONL log + cursor
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{CollectError, Result};
use crate::types::EnrichedRecord;

const LOG_FILE: &str = "checkpoint_records.jsonl";
const CURSOR_FILE: &str = "checkpoint_cursor.json";

/// Run status recorded on the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
}

/// Progress cursor, rewritten atomically at every flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub run_id: String,
    pub symbols_processed: usize,
    pub last_symbol: String,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

/// Resume state reconstructed from the checkpoint artifacts.
pub struct ResumeState {
    pub cursor: Cursor,
    pub records: Vec<EnrichedRecord>,
    pub completed_symbols: HashSet<String>,
}

/// Checkpoint storage: an append-only JSONL record log plus a cursor file.
///
/// The log is append-only so an interrupted flush can lose at most the rows
/// appended since the previous cursor write; the cursor itself is published
/// with write-to-temp-then-rename, so it is always either the old or the
/// new cursor, never a torn one.
pub struct CheckpointStore {
    log_file: PathBuf,
    cursor_file: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_dir: &Path) -> Self {
        CheckpointStore {
            log_file: data_dir.join(LOG_FILE),
            cursor_file: data_dir.join(CURSOR_FILE),
        }
    }

    /// Append records to the log. Failure here is fatal for the run; the
    /// prior checkpoint stays valid and resumable.
    pub async fn append(&self, records: &[EnrichedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.log_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await
            .map_err(|e| CollectError::CheckpointFailed(e.to_string()))?;

        let mut buffer = String::new();
        for record in records {
            let line = serde_json::to_string(record)?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| CollectError::CheckpointFailed(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| CollectError::CheckpointFailed(e.to_string()))?;

        Ok(())
    }

    /// Publish the cursor atomically.
    pub async fn write_cursor(&self, cursor: &Cursor) -> Result<()> {
        if let Some(parent) = self.cursor_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.cursor_file.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(cursor)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CollectError::CheckpointFailed(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.cursor_file)
            .await
            .map_err(|e| CollectError::CheckpointFailed(e.to_string()))?;

        Ok(())
    }

    /// Reconstruct resume state from a prior interrupted run.
    ///
    /// Returns `None` when there is nothing to resume: no cursor, a cursor
    /// from a completed run, or an unreadable cursor (treated as absent).
    /// Malformed log lines are skipped, not fatal.
    pub async fn load(&self) -> Result<Option<ResumeState>> {
        let cursor = match tokio::fs::read_to_string(&self.cursor_file).await {
            Ok(content) => match serde_json::from_str::<Cursor>(&content) {
                Ok(cursor) => cursor,
                Err(e) => {
                    warn!("Checkpoint cursor malformed ({}), starting fresh", e);
                    return Ok(None);
                }
            },
            Err(_) => return Ok(None),
        };

        if cursor.status == RunStatus::Completed {
            return Ok(None);
        }

        let mut records = Vec::new();
        let mut bad_lines = 0usize;
        if let Ok(content) = tokio::fs::read_to_string(&self.log_file).await {
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EnrichedRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(_) => bad_lines += 1,
                }
            }
        }
        if bad_lines > 0 {
            warn!("Skipped {} malformed checkpoint log lines", bad_lines);
        }

        let completed_symbols: HashSet<String> =
            records.iter().map(|r| r.symbol.clone()).collect();

        info!(
            "Found resumable checkpoint: {} symbols processed, {} rows logged",
            cursor.symbols_processed,
            records.len()
        );

        Ok(Some(ResumeState {
            cursor,
            records,
            completed_symbols,
        }))
    }

    /// Drop prior checkpoint artifacts (start of a fresh run).
    pub async fn clear(&self) -> Result<()> {
        for path in [&self.log_file, &self.cursor_file] {
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }
}
