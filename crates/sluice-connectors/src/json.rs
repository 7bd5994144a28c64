//! Remote JSON reader.
//!
//! Unlike the other readers, [`JsonReader`] fetches and parses its whole
//! payload when it is constructed. Flat payloads become a table directly;
//! payloads with any nested object or list are flattened first, joining
//! object keys with a separator and keeping lists as values.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use sluice_core::{
    ColumnMapping, Dataset, Frame, Memo, Reader, ReaderError, Record, Result, UpstreamExt, Value,
};
use tracing::{debug, info};

use crate::http::{build_client, json_body};

fn default_timeout_secs() -> u64 {
    30
}

/// Request settings for the payload fetch.
#[derive(Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as `Authorization: Bearer <token>`; redacted in `Debug` output.
    #[serde(default)]
    pub oauth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("oauth_token", &self.oauth_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            oauth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// Build an HttpConfig from environment variables:
    ///   API_TOKEN
    pub fn from_env() -> Self {
        Self {
            oauth_token: std::env::var("API_TOKEN").ok(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.oauth_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    /// Joins nested object keys into column names.
    pub sep: String,
    /// Keys to descend through before reading records, e.g. `["data", "items"]`.
    pub record_path: Vec<String>,
    pub limit: Option<usize>,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            sep: ".".to_string(),
            record_path: Vec::new(),
            limit: None,
        }
    }
}

/// GET `url` and decode the body as JSON. Non-2xx answers are errors.
pub fn fetch(url: &str, http: &HttpConfig) -> Result<Value> {
    let client = build_client(http.timeout_secs)?;
    let mut request = client.get(url);
    for (name, value) in &http.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(token) = &http.oauth_token {
        request = request.bearer_auth(token);
    }
    debug!("JsonReader fetch: url='{}'", url);
    json_body(request.send().upstream()?)
}

/// Whether any object in `value` holds an object or list, at any depth.
pub fn has_nested(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .values()
            .any(|v| v.is_object() || v.is_array() || has_nested(v)),
        Value::Array(items) => items.iter().any(has_nested),
        _ => false,
    }
}

fn flatten_into(map: serde_json::Map<String, Value>, prefix: &str, sep: &str, out: &mut Record) {
    for (key, value) in map {
        let name = format!("{}{}", prefix, key);
        match value {
            Value::Object(inner) => flatten_into(inner, &format!("{}{}", name, sep), sep, out),
            other => {
                out.insert(name, other);
            }
        }
    }
}

fn descend(value: Value, path: &[String]) -> Result<Vec<Value>> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(match value {
            Value::Array(items) => items,
            other => vec![other],
        });
    };
    match value {
        Value::Object(mut map) => {
            let next = map.remove(key).ok_or_else(|| {
                ReaderError::config(format!("record path key '{}' not found", key))
            })?;
            descend(next, rest)
        }
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(descend(item, path)?);
            }
            Ok(out)
        }
        other => Err(ReaderError::config(format!(
            "cannot follow record path key '{}' into {}",
            key, other
        ))),
    }
}

/// Turn a JSON payload into a table.
///
/// A list yields one row per element and a single object yields one row.
/// Scalar elements land in column `"0"`.
pub fn normalize(payload: Value, options: &JsonOptions) -> Result<Frame> {
    let (items, nested) = if options.record_path.is_empty() {
        let nested = has_nested(&payload);
        let items = match payload {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(ReaderError::config(format!(
                    "JSON payload must be an object or a list, got {}",
                    other
                )))
            }
        };
        (items, nested)
    } else {
        (descend(payload, &options.record_path)?, true)
    };

    let records: Vec<Record> = items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) if nested => {
                let mut row = Record::new();
                flatten_into(map, "", &options.sep, &mut row);
                row
            }
            Value::Object(map) => map,
            scalar => {
                let mut row = Record::new();
                row.insert("0".to_string(), scalar);
                row
            }
        })
        .collect();
    debug!("JsonReader normalized {} records (nested={})", records.len(), nested);
    Ok(Frame::from_records(&records))
}

/// Reads a JSON payload that was fetched in full at construction.
#[derive(Debug)]
pub struct JsonReader {
    source: String,
    frame: Frame,
    limit: Option<usize>,
    columns: Memo<Vec<String>>,
}

impl JsonReader {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, &HttpConfig::default(), JsonOptions::default())
    }

    pub fn with_config(url: &str, http: &HttpConfig, options: JsonOptions) -> Result<Self> {
        let payload = fetch(url, http)?;
        let reader = Self::build(url.to_string(), payload, options)?;
        info!(
            "JsonReader: url='{}', shape={:?}",
            url,
            reader.frame.shape()
        );
        Ok(reader)
    }

    /// Build from a payload that is already in memory.
    pub fn from_value(payload: Value, options: JsonOptions) -> Result<Self> {
        Self::build("<inline>".to_string(), payload, options)
    }

    fn build(source: String, payload: Value, options: JsonOptions) -> Result<Self> {
        let frame = normalize(payload, &options)?;
        Ok(Self {
            source,
            frame,
            limit: options.limit,
            columns: Memo::new(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl Reader for JsonReader {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Answer exactly one HTTP request, returning the raw request text.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/items", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn reader(payload: Value) -> JsonReader {
        JsonReader::from_value(payload, JsonOptions::default()).unwrap()
    }

    #[test]
    fn test_flat_list_one_record_per_object() {
        let mut r = reader(json!([
            {"id": 1, "name": "a"},
            {"id": 2, "name": "b"},
            {"id": 3, "name": "c"}
        ]));
        assert_eq!(r.columns().unwrap(), ["id", "name"]);
        let out = r
            .read(&ColumnMapping::identity(["id", "name"]))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], json!({"id": 3, "name": "c"}).as_object().cloned().unwrap());
    }

    #[test]
    fn test_nested_objects_become_dotted_columns() {
        let mut r = reader(json!([
            {"id": 1, "user": {"name": "ann", "geo": {"lat": 1.5}}, "tags": ["x", "y"]},
            {"id": 2, "user": {"name": "bob", "geo": {"lat": -2.0}}, "tags": []}
        ]));
        assert_eq!(
            r.columns().unwrap(),
            ["id", "user.name", "user.geo.lat", "tags"]
        );
        let out = r
            .read(&ColumnMapping::new([("user.geo.lat", "lat"), ("tags", "tags")]))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out[0]["lat"], json!(1.5));
        assert_eq!(out[0]["tags"], json!(["x", "y"]));
        assert_eq!(out[1]["lat"], json!(-2.0));
    }

    #[test]
    fn test_custom_separator_and_record_path() {
        let payload = json!({"data": {"items": [{"a": {"b": 1}}, {"a": {"b": 2}}]}});
        let options = JsonOptions {
            sep: "_".into(),
            record_path: vec!["data".into(), "items".into()],
            limit: Some(1),
        };
        let mut r = JsonReader::from_value(payload, options).unwrap();
        assert_eq!(r.columns().unwrap(), ["a_b"]);
        let out = r
            .read(&ColumnMapping::identity(["a_b"]))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["a_b"], json!(1));
    }

    #[test]
    fn test_missing_record_path_key() {
        let options = JsonOptions {
            record_path: vec!["nope".into()],
            ..JsonOptions::default()
        };
        let err = JsonReader::from_value(json!({"data": []}), options).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_single_object_and_scalars() {
        let r = reader(json!({"id": 7, "ok": true}));
        assert_eq!(r.frame().shape(), (1, 2));
        let r = reader(json!([10, 20, 30]));
        assert_eq!(r.frame().columns(), ["0"]);
        assert_eq!(r.frame().shape(), (3, 1));
        assert!(JsonReader::from_value(json!(42), JsonOptions::default())
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_has_nested() {
        assert!(!has_nested(&json!([{"a": 1}, {"a": "x"}])));
        assert!(!has_nested(&json!([1, 2, 3])));
        assert!(has_nested(&json!([{"a": {"b": 1}}])));
        assert!(has_nested(&json!({"a": [1]})));
        assert!(has_nested(&json!([[{"a": {}}]])));
    }

    #[test]
    fn test_fetch_sends_bearer_token_and_headers() {
        let (url, server) = serve_once("200 OK", r#"[{"id": 1}, {"id": 2}]"#);
        let http = HttpConfig::default()
            .with_token("tok-123")
            .with_header("X-Tenant", "acme");
        let r = JsonReader::with_config(&url, &http, JsonOptions::default()).unwrap();
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /items"));
        assert!(request.contains("authorization: bearer tok-123"));
        assert!(request.contains("x-tenant: acme"));
        assert_eq!(r.frame().shape(), (2, 1));
    }

    #[test]
    fn test_payload_is_loaded_at_construction() {
        let (url, server) = serve_once("200 OK", r#"[{"id": 1}]"#);
        let r = JsonReader::new(&url).unwrap();
        // the responder has already answered its only request
        server.join().unwrap();
        let mapping = ColumnMapping::identity(["id"]);
        assert_eq!(r.read(&mapping).unwrap().count(), 1);
        assert_eq!(r.read(&mapping).unwrap().count(), 1);
        assert_eq!(r.source(), url);
    }

    #[test]
    fn test_non_success_status_is_error() {
        let (url, server) = serve_once("404 Not Found", r#"{"error": "missing"}"#);
        let err = JsonReader::new(&url).unwrap_err();
        server.join().unwrap();
        match err {
            ReaderError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert!(body.contains("missing"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_http_config_debug_redacts_token() {
        let http = HttpConfig::default().with_token("s3cr3t");
        assert!(!format!("{:?}", http).contains("s3cr3t"));
    }
}
