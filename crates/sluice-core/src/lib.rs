//! Sluice Core - records, lazy datasets and the reader contract
//!
//! Every source adapter in `sluice-connectors` turns its backend's native
//! iteration primitive into a [`Dataset`]: a one-shot, lazily evaluated
//! sequence of [`Record`]s projected and renamed through a [`ColumnMapping`].

pub mod dataset;
pub mod error;
pub mod frame;
pub mod reader;
pub mod record;

pub use dataset::{Dataset, RecordIter};
pub use error::{ReaderError, Result, UpstreamExt};
pub use frame::Frame;
pub use reader::{apply_limit, Memo, Reader, DEFAULT_BATCH_SIZE};
pub use record::{ColumnMapping, Record, Value};
