//! Where fresh feedback comes from.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{debug, info};

use data_loader::parser::parse_ratings;
use data_loader::{Catalog, FeedbackTable, LoadOptions, clean_feedback};

/// A provider of the current feedback table.
///
/// `fetch` returns `Ok(None)` when the source knows nothing changed since
/// the last applied table, so callers can skip the structural comparison.
/// A fetched table only counts as applied once `mark_applied` is called;
/// until then the next `fetch` hands it out again.
pub trait FeedbackSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self) -> Result<Option<FeedbackTable>>;

    /// The last fetched table was taken by the engine.
    fn mark_applied(&self) {}
}

/// Re-reads a ratings CSV whenever its modification time moves
pub struct CsvFeedbackSource {
    path: PathBuf,
    catalog: Arc<Catalog>,
    options: LoadOptions,
    last_modified: Mutex<Option<SystemTime>>,
    fetched: Mutex<Option<SystemTime>>,
}

impl CsvFeedbackSource {
    /// Watch `path`, keeping only records for anime in `catalog`
    pub fn new(path: impl Into<PathBuf>, catalog: Arc<Catalog>, options: LoadOptions) -> Self {
        Self {
            path: path.into(),
            catalog,
            options,
            last_modified: Mutex::new(None),
            fetched: Mutex::new(None),
        }
    }

    /// Treat the file as already loaded at its current modification time.
    ///
    /// Use this when the engine was built from the same file, so the first
    /// request does not reparse it.
    pub fn mark_loaded(self) -> Result<Self> {
        let modified = modified_time(&self.path)?;
        *self.last_modified.lock().unwrap_or_else(PoisonError::into_inner) = Some(modified);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("Failed to stat {}", path.display()))
}

impl FeedbackSource for CsvFeedbackSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self) -> Result<Option<FeedbackTable>> {
        let modified = modified_time(&self.path)?;
        let last = *self.last_modified.lock().unwrap_or_else(PoisonError::into_inner);
        if last == Some(modified) {
            debug!(path = %self.path.display(), "Ratings file unchanged");
            return Ok(None);
        }

        let records = parse_ratings(&self.path)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        let table = clean_feedback(&self.catalog, records, &self.options);
        info!(path = %self.path.display(), records = table.len(), "Reloaded ratings");

        *self.fetched.lock().unwrap_or_else(PoisonError::into_inner) = Some(modified);
        Ok(Some(table))
    }

    fn mark_applied(&self) {
        let fetched = self.fetched.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(modified) = fetched {
            *self.last_modified.lock().unwrap_or_else(PoisonError::into_inner) = Some(modified);
        }
    }
}
