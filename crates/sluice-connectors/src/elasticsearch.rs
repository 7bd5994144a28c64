//! Search-index reader.
//!
//! [`ElasticsearchReader`] walks every document of an index through the
//! scroll API and projects each hit's `_source`. The HTTP side lives in
//! [`EsClient`]; readers only see the [`SearchConnection`] and
//! [`SearchIndex`] traits, so any scan-capable backend can stand in.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use sluice_core::{
    ColumnMapping, Dataset, Memo, Reader, ReaderError, Record, Result, UpstreamExt, Value,
    DEFAULT_BATCH_SIZE,
};
use tracing::{debug, info, warn};

use crate::http::{build_client, check_status, json_body};

/// Lazily fetched search hits, one `Value` per hit.
pub type Hits = Box<dyn Iterator<Item = Result<Value>> + Send>;

/// An index handle that can enumerate its documents.
pub trait SearchIndex: Send + Sync {
    /// Field names from the index mapping; nested properties as dotted paths.
    fn get_columns(&self) -> Result<Vec<String>>;

    /// Every document of the index, fetched `batch_size` hits at a time.
    fn scan(&self, batch_size: usize) -> Result<Hits>;
}

pub trait SearchConnection: Send + Sync {
    fn get_index(&self, name: &str, doc_type: Option<&str>) -> Result<Arc<dyn SearchIndex>>;
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_keep_alive() -> String {
    "5m".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Cluster connection settings.
#[derive(Clone, Deserialize)]
pub struct EsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Redacted in `Debug` output.
    #[serde(default)]
    pub password: Option<String>,
    /// How long the cluster keeps a scroll context between pages.
    #[serde(default = "default_keep_alive")]
    pub scroll_keep_alive: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for EsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("scroll_keep_alive", &self.scroll_keep_alive)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            scroll_keep_alive: default_keep_alive(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build an EsConfig from environment variables:
    ///   ES_URL, ES_USERNAME, ES_PASSWORD, ES_SCROLL_KEEP_ALIVE
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("ES_URL").unwrap_or_else(|_| default_url()),
            username: std::env::var("ES_USERNAME").ok(),
            password: std::env::var("ES_PASSWORD").ok(),
            scroll_keep_alive: std::env::var("ES_SCROLL_KEEP_ALIVE")
                .unwrap_or_else(|_| default_keep_alive()),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Blocking client for the Elasticsearch REST API.
#[derive(Clone)]
pub struct EsClient {
    http: Client,
    base: String,
    config: EsConfig,
}

impl fmt::Debug for EsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsClient")
            .field("base", &self.base)
            .finish()
    }
}

impl EsClient {
    pub fn new(config: EsConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.url)
            .map_err(|e| ReaderError::config(format!("invalid ES_URL '{}': {}", config.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ReaderError::config(format!(
                "search endpoint must be http(s), got '{}'",
                config.url
            )));
        }
        let http = build_client(config.timeout_secs)?;
        info!("EsClient: url='{}'", config.url);
        Ok(Self {
            http,
            base: config.url.trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn get_index(&self, name: &str, doc_type: Option<&str>) -> EsIndex {
        EsIndex {
            client: self.clone(),
            name: name.to_string(),
            doc_type: doc_type.map(str::to_string),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self.authed(self.http.get(&url)).send().upstream()?;
        json_body(response)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .authed(self.http.post(&url))
            .json(body)
            .send()
            .upstream()?;
        json_body(response)
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let url = format!("{}/_search/scroll", self.base);
        let response = self
            .authed(self.http.delete(&url))
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .upstream()?;
        check_status(response).map(|_| ())
    }
}

/// A single index (and optional mapping type) on an [`EsClient`].
#[derive(Debug, Clone)]
pub struct EsIndex {
    client: EsClient,
    name: String,
    doc_type: Option<String>,
}

impl EsIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn search_path(&self) -> String {
        match &self.doc_type {
            Some(t) => format!("/{}/{}/_search", self.name, t),
            None => format!("/{}/_search", self.name),
        }
    }
}

impl SearchIndex for EsIndex {
    fn get_columns(&self) -> Result<Vec<String>> {
        let body = self.client.get(&format!("/{}/_mapping", self.name))?;
        Ok(mapping_columns(&body, self.doc_type.as_deref()))
    }

    fn scan(&self, batch_size: usize) -> Result<Hits> {
        Ok(Box::new(Scroll {
            client: self.client.clone(),
            search_path: self.search_path(),
            batch_size: batch_size.max(1),
            scroll_id: None,
            buffer: VecDeque::new(),
            started: false,
            done: false,
        }))
    }
}

/// Field names from a `GET /<index>/_mapping` response.
///
/// Handles both typeless (`mappings.properties`) and typed
/// (`mappings.<type>.properties`) layouts.
pub fn mapping_columns(body: &Value, doc_type: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    let indices = body.as_object().into_iter().flat_map(|m| m.values());
    for index in indices {
        let mappings = &index["mappings"];
        if let Some(props) = mappings.get("properties") {
            collect_properties(props, "", &mut out);
            continue;
        }
        if let Some(types) = mappings.as_object() {
            for (name, def) in types {
                if doc_type.map_or(true, |t| t == name) {
                    collect_properties(&def["properties"], "", &mut out);
                }
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    out.retain(|c| seen.insert(c.clone()));
    out
}

fn collect_properties(props: &Value, prefix: &str, out: &mut Vec<String>) {
    let Some(props) = props.as_object() else {
        return;
    };
    for (name, def) in props {
        let path = format!("{}{}", prefix, name);
        match def.get("properties") {
            Some(nested) => collect_properties(nested, &format!("{}.", path), out),
            None => out.push(path),
        }
    }
}

/// Pages through a scroll context, yielding one hit at a time.
struct Scroll {
    client: EsClient,
    search_path: String,
    batch_size: usize,
    scroll_id: Option<String>,
    buffer: VecDeque<Value>,
    started: bool,
    done: bool,
}

impl Scroll {
    fn fetch_page(&mut self) -> Result<Vec<Value>> {
        let keep_alive = self.client.config.scroll_keep_alive.clone();
        let mut body = match &self.scroll_id {
            Some(id) if self.started => self.client.post(
                "/_search/scroll",
                &json!({ "scroll": keep_alive, "scroll_id": id }),
            )?,
            _ => {
                self.started = true;
                let path = format!("{}?scroll={}", self.search_path, keep_alive);
                self.client.post(
                    &path,
                    &json!({
                        "size": self.batch_size,
                        "sort": ["_doc"],
                        "query": { "match_all": {} }
                    }),
                )?
            }
        };
        if let Some(id) = body.get("_scroll_id").and_then(Value::as_str) {
            self.scroll_id = Some(id.to_string());
        }
        let hits = match body.pointer_mut("/hits/hits").map(Value::take) {
            Some(Value::Array(hits)) => hits,
            _ => Vec::new(),
        };
        debug!(
            "EsIndex scroll page: path='{}', hits={}",
            self.search_path,
            hits.len()
        );
        Ok(hits)
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(id) = self.scroll_id.take() {
            if let Err(e) = self.client.clear_scroll(&id) {
                warn!("EsIndex: failed to clear scroll context: {}", e);
            }
        }
    }
}

impl Iterator for Scroll {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(hit) = self.buffer.pop_front() {
            return Some(Ok(hit));
        }
        if self.done {
            return None;
        }
        match self.fetch_page() {
            Ok(hits) if hits.is_empty() => {
                self.finish();
                None
            }
            Ok(hits) => {
                let short = hits.len() < self.batch_size;
                self.buffer.extend(hits);
                if short {
                    self.finish();
                }
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Connection whose client is created on first use and then reused.
pub struct ElasticsearchConnection {
    config: EsConfig,
    client: OnceLock<EsClient>,
}

impl fmt::Debug for ElasticsearchConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchConnection")
            .field("config", &self.config)
            .field("connected", &self.client.get().is_some())
            .finish()
    }
}

impl ElasticsearchConnection {
    pub fn new(config: EsConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn client(&self) -> Result<&EsClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = EsClient::new(self.config.clone())?;
        Ok(self.client.get_or_init(|| client))
    }

    pub fn is_connected(&self) -> bool {
        self.client.get().is_some()
    }
}

impl SearchConnection for ElasticsearchConnection {
    fn get_index(&self, name: &str, doc_type: Option<&str>) -> Result<Arc<dyn SearchIndex>> {
        Ok(Arc::new(self.client()?.get_index(name, doc_type)))
    }
}

/// Take a hit's `_source`, exposing nested fields requested by dotted path.
fn hit_source(mut hit: Value, columns: &ColumnMapping) -> Record {
    let mut source = match hit.get_mut("_source").map(Value::take) {
        Some(Value::Object(map)) => map,
        _ => Record::new(),
    };
    for src in columns.sources() {
        if source.contains_key(src) || !src.contains('.') {
            continue;
        }
        let mut cursor = source.get(src.split('.').next().unwrap_or(src));
        for part in src.split('.').skip(1) {
            cursor = cursor.and_then(|v| v.get(part));
        }
        if let Some(v) = cursor.cloned() {
            source.insert(src.to_string(), v);
        }
    }
    source
}

pub struct ElasticsearchReader {
    index_name: String,
    index: Arc<dyn SearchIndex>,
    batch_size: usize,
    limit: Option<usize>,
    columns: Memo<Vec<String>>,
}

impl fmt::Debug for ElasticsearchReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchReader")
            .field("index", &self.index_name)
            .field("batch_size", &self.batch_size)
            .field("limit", &self.limit)
            .finish()
    }
}

impl ElasticsearchReader {
    pub fn new(
        connection: &dyn SearchConnection,
        index_name: &str,
        doc_type: Option<&str>,
    ) -> Result<Self> {
        let index = connection.get_index(index_name, doc_type)?;
        info!(
            "ElasticsearchReader: index='{}', doc_type={:?}",
            index_name, doc_type
        );
        Ok(Self {
            index_name: index_name.to_string(),
            index,
            batch_size: DEFAULT_BATCH_SIZE,
            limit: None,
            columns: Memo::new(),
        })
    }

    pub fn from_config(config: EsConfig, index_name: &str, doc_type: Option<&str>) -> Result<Self> {
        Self::new(&ElasticsearchConnection::new(config), index_name, doc_type)
    }

    /// Hits per scroll page; `0` keeps the default.
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
}

impl Reader for ElasticsearchReader {
    fn columns(&mut self) -> Result<&[String]> {
        let index = &self.index;
        let cols = self.columns.get_or_try_init(|| index.get_columns())?;
        Ok(cols.as_slice())
    }

    fn get_dataset(&self, columns: &ColumnMapping) -> Result<Dataset> {
        let hits = self.index.scan(self.batch_size)?;
        let mapping = columns.clone();
        let sources = hits.map(move |hit| hit.map(|h| hit_source(h, &mapping)));
        Ok(Dataset::new(sources).rename_and_extract(columns))
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}
