//! Per-run options, cancellation, and the run summary.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::constants::ERROR_PREVIEW_LIMIT;

#[derive(Debug, Clone, Serialize)]
pub struct ImportOptions {
    /// First page to request (pages start at 1)
    pub start_page: u32,
    /// Stop after this many pages
    pub max_pages: u32,
    /// Stop after this many records, across pages
    pub record_limit: Option<usize>,
    pub create_missing_entities: bool,
    /// Stamp the event image URL as metadata for the host to fetch
    pub fetch_images: bool,
    /// Map and match everything, write nothing
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            max_pages: 50,
            record_limit: None,
            create_missing_entities: true,
            fetch_images: true,
            dry_run: false,
        }
    }
}

/// Cooperative cancellation, checked between records
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Fetching { page: u32 },
    Processing { batch: usize },
    Summarizing,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Fetching { page } => write!(f, "fetching page {}", page),
            RunPhase::Processing { batch } => write!(f, "processing batch {}", batch),
            RunPhase::Summarizing => write!(f, "summarizing"),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    MemoryExhausted,
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::MemoryExhausted => "memory_exhausted",
            AbortReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one import run.
///
/// Every fetched record lands in exactly one of imported, updated, skipped or
/// failed. In a dry run imported/updated count what would have been written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportRunResult {
    pub run_id: String,
    pub imported_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub fetched_count: usize,
    pub pages_fetched: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub aborted: Option<AbortReason>,
    pub dry_run: bool,
}

impl ImportRunResult {
    /// The errors shown to operators; the full list goes to the log sink
    pub fn error_preview(&self) -> &[String] {
        &self.errors[..self.errors.len().min(ERROR_PREVIEW_LIMIT)]
    }

    pub fn is_consistent(&self) -> bool {
        self.imported_count + self.updated_count + self.skipped_count + self.failed_count
            == self.fetched_count
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.errors.is_empty()
    }
}

impl fmt::Display for ImportRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} imported, {} updated, {} skipped, {} failed of {} fetched ({} pages) in {:.2}s",
            self.imported_count,
            self.updated_count,
            self.skipped_count,
            self.failed_count,
            self.fetched_count,
            self.pages_fetched,
            self.duration.as_secs_f64()
        )?;
        if let Some(reason) = self.aborted {
            write!(f, ", aborted: {}", reason)?;
        }
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}
