//! One-shot lazy record sequences.
//!
//! A [`Dataset`] wraps an iterator of `Result<Record>` produced by a reader.
//! Operators (`filter`, `limit`, `rename_and_extract`) consume the dataset by
//! value and return a new one layered over the same sequence, so nothing is
//! pulled from the backend until the caller iterates.
//!
//! A dataset is single-pass: once exhausted (or once an error has been
//! yielded) it keeps returning `None`.

use std::fmt;

use crate::error::Result;
use crate::record::{ColumnMapping, Record};

/// Boxed record iterator handed over by readers.
pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

pub struct Dataset {
    inner: RecordIter,
    finished: bool,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("finished", &self.finished)
            .finish()
    }
}

impl Dataset {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Result<Record>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(records.into_iter()),
            finished: false,
        }
    }

    /// Wrap records that are already in memory.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self::new(records.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    /// Flatten a sequence of record batches into one record sequence.
    ///
    /// Batches are pulled one at a time; batch boundaries are not visible to
    /// the consumer. A failed batch surfaces as a single error item.
    pub fn from_batches<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<Record>>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(batches.into_iter().flat_map(|batch| {
            let (rows, failure) = match batch {
                Ok(rows) => (rows, None),
                Err(e) => (Vec::new(), Some(Err(e))),
            };
            rows.into_iter().map(Ok).chain(failure)
        }))
    }

    /// Keep only records for which `predicate` returns true.
    ///
    /// Errors from the underlying sequence are passed through unchanged.
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&Record) -> bool + Send + 'static,
    {
        Dataset::new(Iterator::filter(self, move |item| match item {
            Ok(record) => predicate(record),
            Err(_) => true,
        }))
    }

    /// Stop after `n` records. Never pulls record `n + 1` from upstream.
    pub fn limit(self, n: usize) -> Self {
        Dataset::new(self.take(n))
    }

    /// Project and rename every record through `columns`.
    ///
    /// Output records contain exactly the aliases of `columns`; missing source
    /// keys become `null`.
    pub fn rename_and_extract(self, columns: &ColumnMapping) -> Self {
        let columns = columns.clone();
        Dataset::new(self.map(move |item| item.map(|record| columns.extract(&record))))
    }

    /// Whether the sequence has been exhausted (or ended on an error).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain into a vector, stopping at the first error.
    pub fn collect_records(self) -> Result<Vec<Record>> {
        self.collect()
    }
}

impl Iterator for Dataset {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            None => {
                self.finished = true;
                None
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            item => item,
        }
    }
}
