//! Delimited text file reader.
//!
//! The file is parsed with the `csv` crate in chunks of `batch_size` rows.
//! Each chunk is null-normalized, reindexed to the requested source columns
//! and renamed, and the chunks are flattened into one record sequence. A
//! chunk is only parsed when the consumer pulls past the previous one.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sluice_core::record::is_na_token;
use sluice_core::{
    ColumnMapping, Dataset, Frame, Memo, Reader, ReaderError, Record, Result, UpstreamExt, Value,
    DEFAULT_BATCH_SIZE,
};
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileOptions {
    /// Field separator; must be a single ASCII character.
    pub delimiter: char,
    /// Whether the first line names the columns. Without a header the
    /// columns are called `"0"`, `"1"`, ….
    pub has_headers: bool,
    pub batch_size: usize,
    /// Parse integers, floats and booleans; otherwise every cell stays text.
    pub infer_types: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_headers: true,
            batch_size: DEFAULT_BATCH_SIZE,
            infer_types: true,
        }
    }
}

impl FileOptions {
    /// Tab-separated defaults.
    pub fn tsv() -> Self {
        Self {
            delimiter: '\t',
            ..Self::default()
        }
    }

    fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(ReaderError::config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            )))
        }
    }
}

#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    options: FileOptions,
    limit: Option<usize>,
    columns: Memo<Vec<String>>,
}

impl FileReader {
    /// Bind a file with default options. The file must exist and be readable.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, FileOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: FileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        options.delimiter_byte()?;
        File::open(&path)?;
        info!(
            "FileReader: path='{}', delimiter={:?}, batch_size={}",
            path.display(),
            options.delimiter,
            options.batch_size
        );
        Ok(Self {
            path,
            options,
            limit: None,
            columns: Memo::new(),
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }
}

impl Reader for FileReader {
    fn columns(&mut self) -> Result<&[String]> {
        let (path, options) = (&self.path, &self.options);
        let names = self.columns.get_or_try_init(|| {
            let mut rdr = open_csv(path, options)?;
            let names = header_names(&mut rdr, options)?;
            debug!("FileReader columns: {:?}", names);
            Ok(names)
        })?;
        Ok(names.as_slice())
    }

    fn get_dataset(&self, columns: &ColumnMapping) -> Result<Dataset> {
        let mut rdr = open_csv(&self.path, &self.options)?;
        let headers = header_names(&mut rdr, &self.options)?;
        debug!(
            "FileReader: reading '{}' in chunks of {}",
            self.path.display(),
            self.options.batch_size
        );
        let chunks = Chunks {
            records: rdr.into_records(),
            headers,
            mapping: columns.clone(),
            batch_size: self.options.batch_size.max(1),
            infer_types: self.options.infer_types,
            done: false,
        };
        Ok(Dataset::from_batches(chunks))
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

fn open_csv(path: &Path, options: &FileOptions) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .delimiter(options.delimiter_byte()?)
        .has_headers(options.has_headers)
        .flexible(true)
        .from_path(path)
        .upstream()
}

/// Header names from an open reader. Headerless files peek at the first
/// record for the width; the peeked record is still yielded afterwards.
fn header_names(rdr: &mut csv::Reader<File>, options: &FileOptions) -> Result<Vec<String>> {
    let headers = rdr.headers().upstream()?;
    if options.has_headers {
        Ok(unique_names(headers.iter().map(|h| h.trim().to_string())))
    } else {
        Ok((0..headers.len()).map(|i| i.to_string()).collect())
    }
}

/// Parses one chunk of rows per pull.
struct Chunks {
    records: csv::StringRecordsIntoIter<File>,
    headers: Vec<String>,
    mapping: ColumnMapping,
    batch_size: usize,
    infer_types: bool,
    done: bool,
}

impl Iterator for Chunks {
    type Item = Result<Vec<Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => rows.push(
                    record
                        .iter()
                        .map(|cell| parse_cell(cell, self.infer_types))
                        .collect::<Vec<Value>>(),
                ),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(ReaderError::upstream(e)));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        let mut frame = Frame::new(self.headers.clone(), rows);
        frame.normalize_nulls();
        Some(Ok(frame.into_records(&self.mapping)))
    }
}

/// Convert a raw text cell. Missing-value markers become null.
pub(crate) fn parse_cell(raw: &str, infer_types: bool) -> Value {
    if is_na_token(raw) {
        return Value::Null;
    }
    if !infer_types {
        return Value::String(raw.to_string());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Make header names unique by suffixing repeats with `.1`, `.2`, ….
pub(crate) fn unique_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let mut candidate = name.clone();
        let mut n = 0;
        while out.contains(&candidate) {
            n += 1;
            candidate = format!("{}.{}", name, n);
        }
        out.push(candidate);
    }
    out
}
