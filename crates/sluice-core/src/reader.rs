//! The reader contract shared by every source adapter.

use tracing::debug;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::record::ColumnMapping;

/// Backend round-trip granularity used when a reader is not given one.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// A source adapter that exposes its column names and produces datasets.
///
/// Implementors provide [`Reader::columns`] and [`Reader::get_dataset`];
/// [`Reader::read`] layers the configured row limit on top.
pub trait Reader: Send {
    /// Column names available in the source, discovered once and cached.
    fn columns(&mut self) -> Result<&[String]>;

    /// Build a fresh dataset projected and renamed through `columns`.
    fn get_dataset(&self, columns: &ColumnMapping) -> Result<Dataset>;

    /// Row limit configured at construction, if any.
    fn limit(&self) -> Option<usize> {
        None
    }

    fn read(&self, columns: &ColumnMapping) -> Result<Dataset> {
        let dataset = self.get_dataset(columns)?;
        Ok(apply_limit(dataset, self.limit()))
    }
}

/// Truncate `dataset` to `limit` records when a limit is set.
pub fn apply_limit(dataset: Dataset, limit: Option<usize>) -> Dataset {
    match limit {
        Some(n) => {
            debug!("Applying reader limit: {}", n);
            dataset.limit(n)
        }
        None => dataset,
    }
}

/// A value computed on first access and reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct Memo<T>(Option<T>);

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self(None)
    }

    /// Return the cached value, running `init` only if nothing is cached yet.
    /// A failed `init` leaves the memo empty so the next call retries.
    pub fn get_or_try_init<F>(&mut self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        let value = match self.0.take() {
            Some(v) => v,
            None => init()?,
        };
        Ok(self.0.insert(value))
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }
}
