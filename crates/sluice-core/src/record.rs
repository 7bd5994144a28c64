//! Records and column mappings.
//!
//! A [`Record`] is one row keyed by column name. Key order follows insertion
//! (the workspace enables `serde_json/preserve_order`), so projected records
//! list their aliases in the order of the requested [`ColumnMapping`].
//! Equality between records ignores key order.

use serde::{Deserialize, Deserializer};

pub use serde_json::Value;

/// One row of data: column name → scalar value.
pub type Record = serde_json::Map<String, Value>;

/// Ordered `source column → output alias` pairs.
///
/// Controls both projection (which source columns are kept) and renaming
/// (what they are called in the output).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pairs: Vec<(String, String)>,
}

impl ColumnMapping {
    pub fn new<S, A>(pairs: impl IntoIterator<Item = (S, A)>) -> Self
    where
        S: Into<String>,
        A: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(s, a)| (s.into(), a.into()))
                .collect(),
        }
    }

    /// Keep every listed column under its own name.
    pub fn identity<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            pairs: names
                .into_iter()
                .map(|n| {
                    let n = n.into();
                    (n.clone(), n)
                })
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(s, a)| (s.as_str(), a.as_str()))
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(s, _)| s.as_str())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, a)| a.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Project and rename a single record.
    ///
    /// The output holds exactly the aliases of this mapping, in order. A source
    /// key missing from `record` yields `null`.
    pub fn extract(&self, record: &Record) -> Record {
        self.pairs
            .iter()
            .map(|(src, alias)| {
                let value = record.get(src).cloned().unwrap_or(Value::Null);
                (alias.clone(), value)
            })
            .collect()
    }
}

impl<S: Into<String>, A: Into<String>> FromIterator<(S, A)> for ColumnMapping {
    fn from_iter<T: IntoIterator<Item = (S, A)>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'de> Deserialize<'de> for ColumnMapping {
    /// Accepts either a JSON object (`{"src": "alias"}`, order preserved) or a
    /// list of column names (identity mapping).
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Map(serde_json::Map<String, Value>),
            Names(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Names(names) => Ok(ColumnMapping::identity(names)),
            Repr::Map(map) => map
                .into_iter()
                .map(|(src, alias)| match alias {
                    Value::String(a) => Ok((src, a)),
                    other => Err(<D::Error as serde::de::Error>::custom(format!(
                        "alias for column '{}' must be a string, got {}",
                        src, other
                    ))),
                })
                .collect(),
        }
    }
}

/// Treat the usual missing-value spellings as null.
///
/// Mirrors the NA tokens tabular codecs conventionally recognise, so that
/// empty CSV cells and literal `NaN`/`NULL` markers come through as `null`.
pub fn is_na_token(s: &str) -> bool {
    matches!(
        s,
        "" | "#N/A"
            | "#N/A N/A"
            | "#NA"
            | "-1.#IND"
            | "-1.#QNAN"
            | "-NaN"
            | "-nan"
            | "1.#IND"
            | "1.#QNAN"
            | "<NA>"
            | "N/A"
            | "NA"
            | "NULL"
            | "NaN"
            | "None"
            | "n/a"
            | "nan"
            | "null"
    )
}
