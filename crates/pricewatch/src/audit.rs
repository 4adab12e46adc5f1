//! JSONL run ledger: one line per finished batch or scheduled run.

use crate::batch::{BatchReport, BatchSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Batch,
    Scheduled,
}

/// A single ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: RunMode,
    pub summary: BatchSummary,
    pub failed_queries: Vec<String>,
}

impl RunRecord {
    /// Summarize a finished report.
    pub fn from_report(mode: RunMode, report: &BatchReport) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            mode,
            summary: report.batch_summary.clone(),
            failed_queries: report
                .results
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.query.clone())
                .collect(),
        }
    }
}

/// Append-only JSONL ledger of runs.
pub struct RunLedger {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLedger {
    /// Open or create the ledger file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run ledger: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Ledger file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("run ledger lock poisoned"))?;
        writeln!(file, "{json}").context("writing run ledger")?;
        Ok(())
    }

    /// Record a finished run and return the record written.
    pub fn record(&self, mode: RunMode, report: &BatchReport) -> Result<RunRecord> {
        let record = RunRecord::from_report(mode, report);
        self.append(&record)?;
        Ok(record)
    }

    /// The last `limit` records in the ledger at `path`, oldest first.
    /// Lines that fail to parse are skipped.
    pub fn tail(path: &Path, limit: usize) -> Result<Vec<RunRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        let mut records: Vec<RunRecord> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}
