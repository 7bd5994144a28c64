//! Relational table reader.
//!
//! [`DatabaseReader`] builds a projected `select … from <table>` query from
//! the caller's column mapping and streams it through a
//! [`DatabaseConnection`] in `batch_size` chunks. A [`Condition`] either
//! travels to the server as a `where` clause or is evaluated on the client
//! while records are pulled.

use std::fmt;
use std::sync::Arc;

use sluice_core::{
    ColumnMapping, Dataset, Memo, Reader, ReaderError, Record, Result, Value, DEFAULT_BATCH_SIZE,
};
use tracing::{debug, info};

use crate::filter::{build_where_clause, FilterCondition};
use crate::sql::{DatabaseConfig, SqlConnection};

/// Lazily produced record batches from a relational query.
pub type RowBatches = Box<dyn Iterator<Item = Result<Vec<Record>>> + Send>;

/// The primitives a relational driver must expose.
pub trait DatabaseConnection: Send + Sync {
    /// Look up a table and introspect its columns.
    fn get_table(&self, name: &str) -> Result<Table>;

    /// Run `query`, yielding rows in batches of at most `batch_size`.
    fn read(&self, query: &str, batch_size: usize) -> Result<RowBatches>;
}

/// A bound table and its column names, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_columns(&self) -> &[String] {
        &self.columns
    }
}

/// How the caller identifies the database to read from.
#[derive(Clone)]
pub enum DatabaseSource {
    /// An already-open connection.
    Handle(Arc<dyn DatabaseConnection>),
    /// Connection settings.
    Config(DatabaseConfig),
    /// A connection URL such as `postgres://user@host/db` or `sqlite:data.db`.
    Locator(String),
}

impl fmt::Debug for DatabaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseSource::Handle(_) => f.write_str("Handle(..)"),
            DatabaseSource::Config(cfg) => f.debug_tuple("Config").field(cfg).finish(),
            DatabaseSource::Locator(url) => f
                .debug_tuple("Locator")
                .field(&crate::sql::redact_url(url))
                .finish(),
        }
    }
}

impl DatabaseSource {
    /// Interpret a configuration value: a string is a locator, an object is a
    /// [`DatabaseConfig`]. Anything else is a configuration error.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(url) => Ok(DatabaseSource::Locator(url.clone())),
            Value::Object(_) => {
                let cfg: DatabaseConfig = serde_json::from_value(value.clone())
                    .map_err(|e| ReaderError::config(format!("invalid database config: {}", e)))?;
                Ok(DatabaseSource::Config(cfg))
            }
            other => Err(ReaderError::config(format!(
                "database source must be a connection URL or a config object, got {}",
                other
            ))),
        }
    }

    pub fn connect(self) -> Result<Arc<dyn DatabaseConnection>> {
        match self {
            DatabaseSource::Handle(conn) => Ok(conn),
            DatabaseSource::Config(cfg) => Ok(Arc::new(SqlConnection::connect_with(&cfg)?)),
            DatabaseSource::Locator(url) => Ok(Arc::new(SqlConnection::connect(&url)?)),
        }
    }
}

impl From<Arc<dyn DatabaseConnection>> for DatabaseSource {
    fn from(conn: Arc<dyn DatabaseConnection>) -> Self {
        DatabaseSource::Handle(conn)
    }
}

impl From<DatabaseConfig> for DatabaseSource {
    fn from(cfg: DatabaseConfig) -> Self {
        DatabaseSource::Config(cfg)
    }
}

impl From<&str> for DatabaseSource {
    fn from(url: &str) -> Self {
        DatabaseSource::Locator(url.to_string())
    }
}

/// Client-side row predicate.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Row restriction for a [`DatabaseReader`].
#[derive(Clone)]
pub enum Condition {
    /// Raw predicate text appended as `where <text>` (server-side).
    Sql(String),
    /// Structured conditions rendered into a `where` clause (server-side).
    Filters(Vec<FilterCondition>),
    /// Evaluated on each record as it is pulled (client-side).
    Predicate(Predicate),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Sql(text) => f.debug_tuple("Sql").field(text).finish(),
            Condition::Filters(filters) => f.debug_tuple("Filters").field(filters).finish(),
            Condition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl Condition {
    pub fn sql(text: impl Into<String>) -> Self {
        Condition::Sql(text.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }

    /// Structured filters, each checked against its op.
    pub fn filters(filters: Vec<FilterCondition>) -> Result<Self> {
        for filter in &filters {
            filter.validate()?;
        }
        Ok(Condition::Filters(filters))
    }

    /// Interpret a configuration value: `null` or `""` means no condition, a
    /// string is SQL text, a list is structured filters.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => Ok(Some(Condition::Sql(text.clone()))),
            Value::Array(_) => {
                let filters: Vec<FilterCondition> = serde_json::from_value(value.clone())
                    .map_err(|e| ReaderError::config(format!("invalid filter list: {}", e)))?;
                Condition::filters(filters).map(Some)
            }
            other => Err(ReaderError::config(format!(
                "condition must be SQL text or a list of filters, got {}",
                other
            ))),
        }
    }
}

/// Reads a projected table through a [`DatabaseConnection`].
pub struct DatabaseReader {
    connection: Arc<dyn DatabaseConnection>,
    table: Table,
    condition: Option<Condition>,
    order_by: Option<String>,
    batch_size: usize,
    limit: Option<usize>,
    columns: Memo<Vec<String>>,
}

impl fmt::Debug for DatabaseReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseReader")
            .field("table", &self.table.name())
            .field("condition", &self.condition)
            .field("order_by", &self.order_by)
            .field("batch_size", &self.batch_size)
            .field("limit", &self.limit)
            .finish()
    }
}

impl DatabaseReader {
    /// Resolve `source` and bind `table_name`; the table is introspected here
    /// so that a missing table fails at construction.
    pub fn new(source: impl Into<DatabaseSource>, table_name: &str) -> Result<Self> {
        let connection = source.into().connect()?;
        let table = connection.get_table(table_name)?;
        info!(
            "DatabaseReader: table='{}', columns={}",
            table.name(),
            table.get_columns().len()
        );
        Ok(Self {
            connection,
            table,
            condition: None,
            order_by: None,
            batch_size: DEFAULT_BATCH_SIZE,
            limit: None,
            columns: Memo::new(),
        })
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Append `order by <clause>` so that batch paging is deterministic.
    pub fn with_order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Rows per backend round-trip; `0` keeps the default.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `select <src> as "<alias>", … from <table>`, in mapping order.
    ///
    /// Aliases are quoted so that the server keeps their case.
    pub fn query_text(&self, columns: &ColumnMapping) -> String {
        let fields: Vec<String> = columns
            .iter()
            .map(|(src, alias)| format!("{} as \"{}\"", src, alias.replace('"', "\"\"")))
            .collect();
        format!("select {} from {}", fields.join(","), self.table.name())
    }

    /// Full statement sent to the server plus the client-side predicate, if any.
    fn plan(&self, columns: &ColumnMapping) -> Result<(String, Option<Predicate>)> {
        let mut text = self.query_text(columns);
        let predicate = match &self.condition {
            Some(Condition::Sql(where_text)) => {
                text = format!("{} where {}", text, where_text);
                None
            }
            Some(Condition::Filters(filters)) => {
                if let Some(where_text) = build_where_clause(filters)? {
                    text = format!("{} where {}", text, where_text);
                }
                None
            }
            Some(Condition::Predicate(p)) => Some(Arc::clone(p)),
            None => None,
        };
        if let Some(order) = &self.order_by {
            text = format!("{} order by {}", text, order);
        }
        Ok((text, predicate))
    }
}

impl Reader for DatabaseReader {
    fn columns(&mut self) -> Result<&[String]> {
        let table = &self.table;
        let cols = self
            .columns
            .get_or_try_init(|| Ok(table.get_columns().to_vec()))?;
        Ok(cols.as_slice())
    }

    fn get_dataset(&self, columns: &ColumnMapping) -> Result<Dataset> {
        let (text, predicate) = self.plan(columns)?;
        debug!(
            "DatabaseReader query: {} (batch_size={}, client_filter={})",
            text,
            self.batch_size,
            predicate.is_some()
        );
        let batches = self.connection.read(&text, self.batch_size)?;
        let dataset = Dataset::from_batches(batches);
        Ok(match predicate {
            Some(p) => dataset.filter(move |record| p(record)),
            None => dataset,
        })
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOp, FilterValue};
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns canned rows and records every statement it is asked to run.
    struct Recorder {
        rows: Vec<Record>,
        queries: Mutex<Vec<(String, usize)>>,
    }

    impl Recorder {
        fn new(n: i64) -> Arc<Self> {
            Arc::new(Self {
                rows: (0..n)
                    .map(|i| json!({"id": i, "age": 10 + i}).as_object().cloned().unwrap())
                    .collect(),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn last_query(&self) -> String {
            self.queries.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl DatabaseConnection for Recorder {
        fn get_table(&self, name: &str) -> Result<Table> {
            if name == "people" {
                Ok(Table::new(name, vec!["id".into(), "age".into()]))
            } else {
                Err(ReaderError::config(format!("no table {}", name)))
            }
        }

        fn read(&self, query: &str, batch_size: usize) -> Result<RowBatches> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), batch_size));
            let chunks: Vec<Result<Vec<Record>>> = self
                .rows
                .chunks(batch_size)
                .map(|c| Ok(c.to_vec()))
                .collect();
            Ok(Box::new(chunks.into_iter()))
        }
    }

    fn reader(conn: &Arc<Recorder>) -> DatabaseReader {
        let handle: Arc<dyn DatabaseConnection> = conn.clone();
        DatabaseReader::new(handle, "people").unwrap()
    }

    #[test]
    fn test_query_text_preserves_mapping_order() {
        let conn = Recorder::new(0);
        let r = reader(&conn);
        let mapping = ColumnMapping::new([("age", "years"), ("id", "key")]);
        assert_eq!(
            r.query_text(&mapping),
            "select age as \"years\",id as \"key\" from people"
        );
    }

    #[test]
    fn test_query_text_keeps_alias_case() {
        let conn = Recorder::new(0);
        let r = reader(&conn);
        let mapping = ColumnMapping::new([("id", "userId"), ("age", "odd\"name")]);
        assert_eq!(
            r.query_text(&mapping),
            "select id as \"userId\",age as \"odd\"\"name\" from people"
        );
    }

    #[test]
    fn test_sql_condition_is_sent_to_server() {
        let conn = Recorder::new(3);
        let r = reader(&conn).with_condition(Condition::sql("age > 18"));
        let _ = r.read(&ColumnMapping::identity(["id", "age"])).unwrap();
        assert_eq!(
            conn.last_query(),
            "select id as \"id\",age as \"age\" from people where age > 18"
        );
    }

    #[test]
    fn test_filters_condition_renders_where() {
        let conn = Recorder::new(3);
        let condition = Condition::filters(vec![FilterCondition::new(
            "age",
            FilterOp::Gte,
            FilterValue::Number(11.0),
        )])
        .unwrap();
        let r = reader(&conn).with_condition(condition);
        let _ = r.read(&ColumnMapping::identity(["id"])).unwrap();
        assert_eq!(
            conn.last_query(),
            "select id as \"id\" from people where \"age\" >= 11"
        );
    }

    #[test]
    fn test_malformed_filters_never_reach_server() {
        let bad = FilterCondition::new(
            "age",
            FilterOp::Gt,
            FilterValue::Range(["18".into(), "40".into()]),
        );
        assert!(Condition::filters(vec![bad.clone()])
            .unwrap_err()
            .is_configuration());

        let conn = Recorder::new(3);
        let r = reader(&conn).with_condition(Condition::Filters(vec![bad]));
        let err = r.read(&ColumnMapping::identity(["id"])).unwrap_err();
        assert!(err.is_configuration());
        assert!(conn.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn test_predicate_condition_filters_client_side() {
        let conn = Recorder::new(6);
        let r = reader(&conn)
            .with_batch_size(4)
            .with_condition(Condition::predicate(|r| {
                r["age"].as_i64().unwrap() % 2 == 0
            }));
        let out = r
            .read(&ColumnMapping::identity(["id", "age"]))
            .unwrap()
            .collect_records()
            .unwrap();
        let ids: Vec<i64> = out.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, [0, 2, 4]);
        let queries = conn.queries.lock().unwrap();
        assert_eq!(
            queries[0],
            (
                "select id as \"id\",age as \"age\" from people".to_string(),
                4
            )
        );
    }

    #[test]
    fn test_order_by_appended_after_where() {
        let conn = Recorder::new(1);
        let r = reader(&conn)
            .with_condition(Condition::sql("age > 1"))
            .with_order_by("id");
        let _ = r.read(&ColumnMapping::identity(["id"])).unwrap();
        assert_eq!(
            conn.last_query(),
            "select id as \"id\" from people where age > 1 order by id"
        );
    }

    #[test]
    fn test_limit_applies_after_filter() {
        let conn = Recorder::new(20);
        let r = reader(&conn)
            .with_limit(2)
            .with_condition(Condition::predicate(|r| r["id"].as_i64().unwrap() > 5));
        let out = r
            .read(&ColumnMapping::identity(["id"]))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], json!(6));
    }

    #[test]
    fn test_zero_batch_size_keeps_default() {
        let conn = Recorder::new(0);
        assert_eq!(
            reader(&conn).with_batch_size(0).batch_size(),
            DEFAULT_BATCH_SIZE
        );
    }

    #[test]
    fn test_columns_and_missing_table() {
        let conn = Recorder::new(0);
        let mut r = reader(&conn);
        assert_eq!(r.columns().unwrap(), ["id", "age"]);
        let handle: Arc<dyn DatabaseConnection> = conn.clone();
        assert!(DatabaseReader::new(handle, "ghosts").is_err());
    }

    #[test]
    fn test_condition_from_value() {
        assert!(Condition::from_value(&json!(null)).unwrap().is_none());
        assert!(Condition::from_value(&json!("")).unwrap().is_none());
        assert!(matches!(
            Condition::from_value(&json!("age > 18")).unwrap(),
            Some(Condition::Sql(t)) if t == "age > 18"
        ));
        assert!(matches!(
            Condition::from_value(&json!([{"column": "age", "op": "gt", "value": 18}])).unwrap(),
            Some(Condition::Filters(f)) if f.len() == 1
        ));
        assert!(Condition::from_value(&json!(42))
            .unwrap_err()
            .is_configuration());
        assert!(Condition::from_value(&json!({"age": 18}))
            .unwrap_err()
            .is_configuration());
        assert!(Condition::from_value(&json!([
            {"column": "age", "op": "gt", "value": ["18", "40"]}
        ]))
        .unwrap_err()
        .is_configuration());
    }

    #[test]
    fn test_source_from_value() {
        assert!(matches!(
            DatabaseSource::from_value(&json!("sqlite::memory:")).unwrap(),
            DatabaseSource::Locator(_)
        ));
        assert!(matches!(
            DatabaseSource::from_value(&json!({"url": "sqlite::memory:"})).unwrap(),
            DatabaseSource::Config(c) if c.max_connections == 2
        ));
        assert!(DatabaseSource::from_value(&json!(7))
            .unwrap_err()
            .is_configuration());
        assert!(DatabaseSource::from_value(&json!({"nope": 1}))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_unknown_locator_scheme() {
        let err = DatabaseReader::new("mysql://host/db", "people").unwrap_err();
        assert!(err.is_configuration());
    }
}
