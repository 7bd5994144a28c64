//! In-memory tables.
//!
//! [`Frame`] is the row-oriented table that eagerly loaded sources
//! (spreadsheets, JSON payloads) and file chunks are parsed into before being
//! projected into records.

use std::collections::HashMap;

use crate::record::{is_na_token, ColumnMapping, Record, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Build a frame. Rows shorter than the header are padded with nulls,
    /// longer rows are cut to the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Build a frame from records; columns are the union of keys in order of
    /// first appearance.
    pub fn from_records(records: &[Record]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records {
            for key in record.keys() {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// `(row_count, column_count)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replace missing-value markers (NA strings) with `null`.
    pub fn normalize_nulls(&mut self) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if matches!(cell, Value::String(s) if is_na_token(s)) {
                    *cell = Value::Null;
                }
            }
        }
    }

    pub fn column_non_null_count(&self, col: usize) -> usize {
        self.rows
            .iter()
            .filter(|row| !row.get(col).map_or(true, Value::is_null))
            .count()
    }

    pub fn row_non_null_count(&self, row: usize) -> usize {
        self.rows
            .get(row)
            .map_or(0, |r| r.iter().filter(|v| !v.is_null()).count())
    }

    /// Keep only the top-left `rows × cols` rectangle.
    pub fn truncate(&mut self, rows: usize, cols: usize) {
        self.rows.truncate(rows);
        self.columns.truncate(cols);
        for row in &mut self.rows {
            row.truncate(cols);
        }
    }

    /// Reindex to the mapping's source columns, rename to its aliases and
    /// emit one record per row. Unknown source columns are null-filled.
    pub fn to_records(&self, mapping: &ColumnMapping) -> Vec<Record> {
        let positions = self.positions(mapping);
        self.rows
            .iter()
            .map(|row| project_row(row, &positions))
            .collect()
    }

    /// Owning variant of [`Frame::to_records`].
    pub fn into_records(self, mapping: &ColumnMapping) -> Vec<Record> {
        let positions = self.positions(mapping);
        self.rows
            .into_iter()
            .map(|row| project_row(&row, &positions))
            .collect()
    }

    fn positions(&self, mapping: &ColumnMapping) -> Vec<(String, Option<usize>)> {
        let index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .rev()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        mapping
            .iter()
            .map(|(src, alias)| (alias.to_string(), index.get(src).copied()))
            .collect()
    }
}

fn project_row(row: &[Value], positions: &[(String, Option<usize>)]) -> Record {
    positions
        .iter()
        .map(|(alias, pos)| {
            let value = pos
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or(Value::Null);
            (alias.clone(), value)
        })
        .collect()
}
