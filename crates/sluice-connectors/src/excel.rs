//! Spreadsheet reader.
//!
//! The selected sheet is loaded eagerly with `calamine` into a [`Frame`]
//! whose first row is the header. Unless disabled, the table is then trimmed
//! to its detected border so that blank auto-named columns to the right and
//! blank rows below the data are dropped.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader as _};
use serde::Deserialize;
use sluice_core::{
    ColumnMapping, Dataset, Frame, Memo, Reader, ReaderError, Result, UpstreamExt, Value,
};
use tracing::{debug, info};

use crate::file::unique_names;

const UNNAMED_PREFIX: &str = "Unnamed:";

/// Where the sheet comes from.
#[derive(Debug, Clone)]
pub enum ExcelSource {
    /// A workbook on disk (`xlsx`, `xlsm`, `xlsb`, `xls` or `ods`).
    Path(PathBuf),
    /// A table that is already loaded.
    Frame(Frame),
}

impl From<PathBuf> for ExcelSource {
    fn from(path: PathBuf) -> Self {
        ExcelSource::Path(path)
    }
}

impl From<&Path> for ExcelSource {
    fn from(path: &Path) -> Self {
        ExcelSource::Path(path.to_path_buf())
    }
}

impl From<&str> for ExcelSource {
    fn from(path: &str) -> Self {
        ExcelSource::Path(PathBuf::from(path))
    }
}

impl From<Frame> for ExcelSource {
    fn from(frame: Frame) -> Self {
        ExcelSource::Frame(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        SheetSelector::Index(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExcelOptions {
    pub sheet: SheetSelector,
    pub detect_table_border: bool,
}

impl Default for ExcelOptions {
    fn default() -> Self {
        Self {
            sheet: SheetSelector::default(),
            detect_table_border: true,
        }
    }
}

/// Extent of the data block, as `rows × columns` from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableBorder {
    pub rows: usize,
    pub columns: usize,
}

/// Find where the data block ends.
///
/// The right edge is the first auto-named (`Unnamed: …`) column with no
/// values; the bottom edge is the first row with no values. Either defaults
/// to the full extent.
pub fn detect_table_border(frame: &Frame) -> TableBorder {
    let (rows, columns) = frame.shape();
    let columns = frame
        .columns()
        .iter()
        .enumerate()
        .find(|(i, name)| {
            name.starts_with(UNNAMED_PREFIX) && frame.column_non_null_count(*i) == 0
        })
        .map_or(columns, |(i, _)| i);
    let rows = (0..rows)
        .find(|&i| frame.row_non_null_count(i) == 0)
        .unwrap_or(rows);
    TableBorder { rows, columns }
}

/// Build a table from raw sheet rows; the first row is the header.
///
/// Blank header cells are named `Unnamed: <position>` and repeated names get
/// `.1`, `.2`, … suffixes.
pub fn frame_from_rows(mut rows: Vec<Vec<Value>>) -> Frame {
    if rows.is_empty() {
        return Frame::default();
    }
    let header = rows.remove(0);
    let width = rows.iter().map(Vec::len).fold(header.len(), usize::max);
    let names = (0..width).map(|i| match header.get(i) {
        None | Some(Value::Null) => format!("{} {}", UNNAMED_PREFIX, i),
        Some(Value::String(s)) if s.trim().is_empty() => format!("{} {}", UNNAMED_PREFIX, i),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    });
    Frame::new(unique_names(names), rows)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::DateTime(dt) => {
            serde_json::Number::from_f64(dt.as_f64()).map_or(Value::Null, Value::Number)
        }
        Data::Error(e) => Value::String(e.to_string()),
    }
}

fn load_sheet(path: &Path, sheet: &SheetSelector) -> Result<Frame> {
    let mut workbook = open_workbook_auto(path).upstream()?;
    let range = match sheet {
        SheetSelector::Name(name) => {
            if !workbook.sheet_names().iter().any(|s| s == name) {
                return Err(ReaderError::config(format!(
                    "sheet '{}' not found in '{}'",
                    name,
                    path.display()
                )));
            }
            workbook.worksheet_range(name).upstream()?
        }
        SheetSelector::Index(idx) => match workbook.worksheet_range_at(*idx) {
            Some(range) => range.upstream()?,
            None => {
                return Err(ReaderError::config(format!(
                    "sheet index {} out of range in '{}'",
                    idx,
                    path.display()
                )))
            }
        },
    };
    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    Ok(frame_from_rows(rows))
}

/// Reads one sheet of a workbook (or an already-loaded table).
#[derive(Debug)]
pub struct ExcelReader {
    frame: Frame,
    border: TableBorder,
    limit: Option<usize>,
    columns: Memo<Vec<String>>,
}

impl ExcelReader {
    pub fn new(source: impl Into<ExcelSource>) -> Result<Self> {
        Self::with_options(source, ExcelOptions::default())
    }

    pub fn with_options(source: impl Into<ExcelSource>, options: ExcelOptions) -> Result<Self> {
        let mut frame = match source.into() {
            ExcelSource::Path(path) => {
                let frame = load_sheet(&path, &options.sheet)?;
                info!(
                    "ExcelReader: path='{}', sheet={:?}, shape={:?}",
                    path.display(),
                    options.sheet,
                    frame.shape()
                );
                frame
            }
            ExcelSource::Frame(frame) => {
                info!("ExcelReader: in-memory frame, shape={:?}", frame.shape());
                frame
            }
        };
        frame.normalize_nulls();

        let (rows, columns) = frame.shape();
        let border = if options.detect_table_border {
            let border = detect_table_border(&frame);
            frame.truncate(border.rows, border.columns);
            debug!("ExcelReader border: {:?}", border);
            border
        } else {
            TableBorder { rows, columns }
        };

        Ok(Self {
            frame,
            border,
            limit: None,
            columns: Memo::new(),
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The data extent kept after border detection.
    pub fn border(&self) -> TableBorder {
        self.border
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Reader for ExcelReader {
    fn columns(&mut self) -> Result<&[String]> {
        let frame = &self.frame;
        let cols = self
            .columns
            .get_or_try_init(|| Ok(frame.columns().to_vec()))?;
        Ok(cols.as_slice())
    }

    fn get_dataset(&self, columns: &ColumnMapping) -> Result<Dataset> {
        Ok(Dataset::from_records(self.frame.to_records(columns)))
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}
