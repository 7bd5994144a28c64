//! Source factory: build any reader from configuration or a URI.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sluice_core::{Reader, ReaderError, Result, Value};
use tracing::info;

use crate::database::{Condition, DatabaseReader, DatabaseSource};
use crate::elasticsearch::{ElasticsearchReader, EsConfig};
use crate::excel::{ExcelOptions, ExcelReader};
use crate::file::{FileOptions, FileReader};
use crate::json::{HttpConfig, JsonOptions, JsonReader};

/// Declarative description of a source, tagged by `"type"`.
///
/// ```json
/// {"type": "database", "source": "postgres://u@host/db", "table": "people",
///  "condition": "age > 18", "batch_size": 500}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Database {
        /// Connection URL or `{"url": …, "max_connections": …}`.
        source: Value,
        table: String,
        /// SQL text, a list of structured filters, or null.
        #[serde(default)]
        condition: Value,
        #[serde(default)]
        order_by: Option<String>,
        #[serde(default)]
        batch_size: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        options: FileOptions,
        #[serde(default)]
        limit: Option<usize>,
    },
    Excel {
        path: PathBuf,
        #[serde(default)]
        options: ExcelOptions,
        #[serde(default)]
        limit: Option<usize>,
    },
    Elasticsearch {
        #[serde(default)]
        connection: EsConfig,
        index: String,
        #[serde(default)]
        doc_type: Option<String>,
        #[serde(default)]
        batch_size: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Json {
        url: String,
        #[serde(default)]
        http: HttpConfig,
        #[serde(default)]
        options: JsonOptions,
    },
}

impl SourceConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ReaderError::config(format!("invalid source config: {}", e)))
    }

    /// Derive a config from a source URI.
    ///
    /// - `postgres://…?table=<name>`, `sqlite:<path>?table=<name>`
    /// - `es+http://host:9200/<index>[/<doc_type>]`
    /// - `http(s)://…` (JSON endpoint)
    /// - a path ending in `.csv`, `.tsv`, `.xlsx`, `.xlsm`, `.xlsb`, `.xls` or `.ods`
    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.starts_with("postgres://")
            || uri.starts_with("postgresql://")
            || uri.starts_with("sqlite:")
        {
            return database_from_uri(uri);
        }
        if let Some(rest) = uri.strip_prefix("es+") {
            return elasticsearch_from_uri(rest);
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(SourceConfig::Json {
                url: uri.to_string(),
                http: HttpConfig::default(),
                options: JsonOptions::default(),
            });
        }
        file_from_path(uri.strip_prefix("file://").unwrap_or(uri))
    }

    fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Database { .. } => "database",
            SourceConfig::File { .. } => "file",
            SourceConfig::Excel { .. } => "excel",
            SourceConfig::Elasticsearch { .. } => "elasticsearch",
            SourceConfig::Json { .. } => "json",
        }
    }
}

fn database_from_uri(uri: &str) -> Result<SourceConfig> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| ReaderError::config(format!("invalid source URI '{}': {}", uri, e)))?;
    let table = parsed
        .query_pairs()
        .find(|(k, _)| k == "table")
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| ReaderError::config(format!("missing ?table= in source URI: {}", uri)))?;
    let rest: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "table")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut conn_url = parsed.clone();
    if rest.is_empty() {
        conn_url.set_query(None);
    } else {
        conn_url.query_pairs_mut().clear().extend_pairs(rest);
    }
    Ok(SourceConfig::Database {
        source: Value::String(conn_url.to_string()),
        table,
        condition: Value::Null,
        order_by: None,
        batch_size: None,
        limit: None,
    })
}

fn elasticsearch_from_uri(uri: &str) -> Result<SourceConfig> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| ReaderError::config(format!("invalid search URI '{}': {}", uri, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ReaderError::config(format!("missing host in search URI: {}", uri)))?;
    let mut segments = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());
    let index = segments
        .next()
        .ok_or_else(|| ReaderError::config(format!("missing index in search URI: {}", uri)))?
        .to_string();
    let doc_type = segments.next().map(str::to_string);

    let base = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    let mut connection = EsConfig::new(base);
    if !parsed.username().is_empty() {
        connection.username = Some(parsed.username().to_string());
        connection.password = parsed.password().map(str::to_string);
    }
    Ok(SourceConfig::Elasticsearch {
        connection,
        index,
        doc_type,
        batch_size: None,
        limit: None,
    })
}

fn file_from_path(raw: &str) -> Result<SourceConfig> {
    let path = Path::new(raw);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(SourceConfig::File {
            path: path.to_path_buf(),
            options: FileOptions::default(),
            limit: None,
        }),
        "tsv" => Ok(SourceConfig::File {
            path: path.to_path_buf(),
            options: FileOptions::tsv(),
            limit: None,
        }),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceConfig::Excel {
            path: path.to_path_buf(),
            options: ExcelOptions::default(),
            limit: None,
        }),
        _ => Err(ReaderError::config(format!(
            "unsupported source URI format: {}",
            raw
        ))),
    }
}

/// Build the reader a config describes.
pub fn open_reader(config: SourceConfig) -> Result<Box<dyn Reader>> {
    info!("Opening {} source", config.kind());
    let reader: Box<dyn Reader> = match config {
        SourceConfig::Database {
            source,
            table,
            condition,
            order_by,
            batch_size,
            limit,
        } => {
            let condition = Condition::from_value(&condition)?;
            let mut reader = DatabaseReader::new(DatabaseSource::from_value(&source)?, &table)?;
            if let Some(condition) = condition {
                reader = reader.with_condition(condition);
            }
            if let Some(order) = order_by {
                reader = reader.with_order_by(order);
            }
            if let Some(n) = batch_size {
                reader = reader.with_batch_size(n);
            }
            if let Some(n) = limit {
                reader = reader.with_limit(n);
            }
            Box::new(reader)
        }
        SourceConfig::File {
            path,
            options,
            limit,
        } => {
            let reader = FileReader::with_options(path, options)?;
            Box::new(match limit {
                Some(n) => reader.with_limit(n),
                None => reader,
            })
        }
        SourceConfig::Excel {
            path,
            options,
            limit,
        } => {
            let reader = ExcelReader::with_options(path, options)?;
            Box::new(match limit {
                Some(n) => reader.with_limit(n),
                None => reader,
            })
        }
        SourceConfig::Elasticsearch {
            connection,
            index,
            doc_type,
            batch_size,
            limit,
        } => {
            let mut reader =
                ElasticsearchReader::from_config(connection, &index, doc_type.as_deref())?;
            if let Some(n) = batch_size {
                reader = reader.with_batch_size(n);
            }
            if let Some(n) = limit {
                reader = reader.with_limit(n);
            }
            Box::new(reader)
        }
        SourceConfig::Json { url, http, options } => {
            Box::new(JsonReader::with_config(&url, &http, options)?)
        }
    };
    Ok(reader)
}

/// Shorthand for [`SourceConfig::from_uri`] followed by [`open_reader`].
pub fn open_uri(uri: &str) -> Result<Box<dyn Reader>> {
    open_reader(SourceConfig::from_uri(uri)?)
}
