//! End-of-run counters

use crate::loader::{LoadOutcome, LoadReport};
use serde::Serialize;
use std::fmt;

/// What happened to a single dispatched file
#[derive(Debug)]
pub enum FileResult {
    FetchFailed,
    /// Fetch succeeded but the load was not attempted because of shutdown
    Skipped,
    Loaded(LoadReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub watermark: String,
    pub files_selected: u64,
    pub files_fetched: u64,
    pub files_fetch_failed: u64,
    pub files_loaded: u64,
    pub files_load_failed: u64,
    pub files_interrupted: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub rows_submitted: u64,
    pub rows_inserted: u64,
    pub rows_rejected: u64,
}

impl RunSummary {
    pub fn new(watermark: impl Into<String>, files_selected: usize) -> Self {
        Self {
            watermark: watermark.into(),
            files_selected: files_selected as u64,
            ..Self::default()
        }
    }

    pub fn record(&mut self, result: &FileResult) {
        match result {
            FileResult::FetchFailed => self.files_fetch_failed += 1,
            FileResult::Skipped => {
                self.files_fetched += 1;
                self.files_interrupted += 1;
            },
            FileResult::Loaded(report) => {
                self.files_fetched += 1;
                match report.outcome {
                    LoadOutcome::Loaded => self.files_loaded += 1,
                    LoadOutcome::BatchesFailed | LoadOutcome::ReadFailed(_) => {
                        self.files_load_failed += 1
                    },
                    LoadOutcome::Interrupted => self.files_interrupted += 1,
                }
                self.batches_committed += report.batches_committed;
                self.batches_failed += report.batches_failed;
                self.rows_submitted += report.rows_submitted;
                self.rows_inserted += report.rows_inserted;
                self.rows_rejected += report.rows_rejected;
            },
        }
    }

    /// Submitted rows dropped by primary-key conflicts
    pub fn rows_conflicted(&self) -> u64 {
        self.rows_submitted.saturating_sub(self.rows_inserted)
    }

    /// Files not attempted because the run was shut down
    pub fn files_not_started(&self) -> u64 {
        self.files_selected
            .saturating_sub(self.files_fetched + self.files_fetch_failed)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "watermark:          {}", self.watermark)?;
        writeln!(f, "files selected:     {}", self.files_selected)?;
        writeln!(f, "files fetched:      {}", self.files_fetched)?;
        writeln!(f, "fetch failures:     {}", self.files_fetch_failed)?;
        writeln!(f, "files loaded:       {}", self.files_loaded)?;
        writeln!(f, "load failures:      {}", self.files_load_failed)?;
        writeln!(f, "files interrupted:  {}", self.files_interrupted)?;
        writeln!(f, "batches committed:  {}", self.batches_committed)?;
        writeln!(f, "batches failed:     {}", self.batches_failed)?;
        writeln!(f, "rows inserted:      {}", self.rows_inserted)?;
        writeln!(f, "rows conflicted:    {}", self.rows_conflicted())?;
        write!(f, "rows rejected:      {}", self.rows_rejected)
    }
}
