//! Sluice Connectors - source readers
//!
//! Every reader implements [`sluice_core::Reader`]:
//! - [`DatabaseReader`]: relational tables (Postgres, SQLite) via `sqlx`
//! - [`FileReader`]: delimited text files, read in chunks
//! - [`ExcelReader`]: one sheet of a workbook, trimmed to its data border
//! - [`ElasticsearchReader`]: every document of a search index via scroll
//! - [`JsonReader`]: a JSON payload fetched over HTTP

pub mod database;
pub mod elasticsearch;
pub mod excel;
pub mod factory;
pub mod file;
pub mod filter;
mod http;
pub mod json;
pub mod sql;

pub use database::{Condition, DatabaseConnection, DatabaseReader, DatabaseSource, Table};
pub use elasticsearch::{
    ElasticsearchConnection, ElasticsearchReader, EsClient, EsConfig, EsIndex, SearchConnection,
    SearchIndex,
};
pub use excel::{
    detect_table_border, ExcelOptions, ExcelReader, ExcelSource, SheetSelector, TableBorder,
};
pub use factory::{open_reader, open_uri, SourceConfig};
pub use file::{FileOptions, FileReader};
pub use filter::{build_where_clause, FilterCondition, FilterOp, FilterValue};
pub use json::{HttpConfig, JsonOptions, JsonReader};
pub use sql::{DatabaseConfig, Dialect, SqlConnection};
