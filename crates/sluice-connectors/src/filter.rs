//! Structured row conditions, rendered into SQL for server-side filtering.
//!
//! Every [`FilterCondition`] is checked against the value shape its op needs
//! before it is rendered; a mismatch is a configuration error rather than a
//! silently widened predicate.

use serde::Deserialize;
use sluice_core::{ReaderError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    Like,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    String(String),
    Range([String; 2]),
    StringArray(Vec<String>),
    None,
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::None
    }
}

impl FilterValue {
    /// List view for `in`; a two-element list deserializes as a range.
    fn as_list(&self) -> Option<&[String]> {
        match self {
            FilterValue::StringArray(vals) => Some(vals.as_slice()),
            FilterValue::Range(vals) => Some(vals.as_slice()),
            _ => None,
        }
    }
}

fn sanitize_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn sanitize_sql_identifier(s: &str) -> String {
    s.replace('"', "\"\"")
}

fn format_number(n: f64) -> String {
    if n == n.floor() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    fn shape_error(&self) -> ReaderError {
        ReaderError::config(format!(
            "filter on '{}': op {:?} cannot take value {:?}",
            self.column, self.op, self.value
        ))
    }

    /// Check that the value has the shape the op needs: a number or string
    /// for comparisons, a two-element list for `between`, a list for `in`, a
    /// string for `like` and no value for the null checks.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.op {
            FilterOp::Eq
            | FilterOp::Neq
            | FilterOp::Gt
            | FilterOp::Gte
            | FilterOp::Lt
            | FilterOp::Lte => {
                matches!(self.value, FilterValue::Number(_) | FilterValue::String(_))
            }
            FilterOp::Between => matches!(self.value, FilterValue::Range(_)),
            FilterOp::In => self.value.as_list().is_some(),
            FilterOp::Like => matches!(self.value, FilterValue::String(_)),
            FilterOp::IsNull | FilterOp::NotNull => matches!(self.value, FilterValue::None),
        };
        if ok {
            Ok(())
        } else {
            Err(self.shape_error())
        }
    }

    /// Render as a SQL predicate with quoted identifier and escaped literals.
    pub fn to_sql(&self) -> Result<String> {
        let col = format!("\"{}\"", sanitize_sql_identifier(&self.column));
        let lit = |v: &str| format!("'{}'", sanitize_sql_string(v));
        let scalar = match &self.value {
            FilterValue::Number(n) => Some(format_number(*n)),
            FilterValue::String(s) => Some(lit(s)),
            _ => None,
        };
        let cmp = |sym: &str| match &scalar {
            Some(v) => Ok(format!("{} {} {}", col, sym, v)),
            None => Err(self.shape_error()),
        };
        match self.op {
            FilterOp::Eq => cmp("="),
            FilterOp::Neq => cmp("!="),
            FilterOp::Gt => cmp(">"),
            FilterOp::Gte => cmp(">="),
            FilterOp::Lt => cmp("<"),
            FilterOp::Lte => cmp("<="),
            FilterOp::Between => match &self.value {
                FilterValue::Range([from, to]) => {
                    Ok(format!("{} BETWEEN {} AND {}", col, lit(from), lit(to)))
                }
                _ => Err(self.shape_error()),
            },
            FilterOp::In => match self.value.as_list() {
                Some(vals) => {
                    let list = vals.iter().map(|v| lit(v)).collect::<Vec<_>>().join(", ");
                    Ok(format!("{} IN ({})", col, list))
                }
                None => Err(self.shape_error()),
            },
            FilterOp::Like => match &self.value {
                FilterValue::String(p) => Ok(format!("{} LIKE {}", col, lit(p))),
                _ => Err(self.shape_error()),
            },
            FilterOp::IsNull | FilterOp::NotNull => {
                self.validate()?;
                let check = if self.op == FilterOp::IsNull {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                Ok(format!("{} {}", col, check))
            }
        }
    }
}

/// Join conditions with `AND` into a bare predicate (no `WHERE` keyword).
/// Returns `None` when there is nothing to filter on.
pub fn build_where_clause(conditions: &[FilterCondition]) -> Result<Option<String>> {
    if conditions.is_empty() {
        return Ok(None);
    }
    let parts = conditions
        .iter()
        .map(FilterCondition::to_sql)
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(parts.join(" AND ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fc(column: &str, op: FilterOp, value: FilterValue) -> FilterCondition {
        FilterCondition::new(column, op, value)
    }

    #[test]
    fn test_eq_string_to_sql() {
        let sql = fc("status", FilterOp::Eq, FilterValue::String("active".into()))
            .to_sql()
            .unwrap();
        assert_eq!(sql, "\"status\" = 'active'");
    }

    #[test]
    fn test_number_to_sql() {
        assert_eq!(
            fc("count", FilterOp::Gte, FilterValue::Number(42.0))
                .to_sql()
                .unwrap(),
            "\"count\" >= 42"
        );
        assert_eq!(
            fc("price", FilterOp::Lt, FilterValue::Number(19.99))
                .to_sql()
                .unwrap(),
            "\"price\" < 19.99"
        );
    }

    #[test]
    fn test_between_and_in_to_sql() {
        let between = fc(
            "day",
            FilterOp::Between,
            FilterValue::Range(["2024-01-01".into(), "2024-01-31".into()]),
        );
        assert_eq!(
            between.to_sql().unwrap(),
            "\"day\" BETWEEN '2024-01-01' AND '2024-01-31'"
        );
        let within = fc(
            "cat",
            FilterOp::In,
            FilterValue::StringArray(vec!["food".into(), "drink".into(), "misc".into()]),
        );
        assert_eq!(
            within.to_sql().unwrap(),
            "\"cat\" IN ('food', 'drink', 'misc')"
        );
        let pair = fc(
            "cat",
            FilterOp::In,
            FilterValue::Range(["food".into(), "drink".into()]),
        );
        assert_eq!(pair.to_sql().unwrap(), "\"cat\" IN ('food', 'drink')");
    }

    #[test]
    fn test_null_checks_to_sql() {
        assert_eq!(
            fc("x", FilterOp::IsNull, FilterValue::None).to_sql().unwrap(),
            "\"x\" IS NULL"
        );
        assert_eq!(
            fc("x", FilterOp::NotNull, FilterValue::None).to_sql().unwrap(),
            "\"x\" IS NOT NULL"
        );
    }

    #[test]
    fn test_mismatched_op_value_is_rejected() {
        let cases = [
            fc("age", FilterOp::Gt, FilterValue::Range(["18".into(), "40".into()])),
            fc("age", FilterOp::Eq, FilterValue::StringArray(vec!["1".into()])),
            fc("age", FilterOp::Lt, FilterValue::None),
            fc("day", FilterOp::Between, FilterValue::String("2024-01-01".into())),
            fc("col", FilterOp::Like, FilterValue::Number(1.0)),
            fc("cat", FilterOp::In, FilterValue::String("food".into())),
            fc("x", FilterOp::IsNull, FilterValue::Number(0.0)),
        ];
        for cond in &cases {
            assert!(cond.validate().unwrap_err().is_configuration(), "{:?}", cond);
            assert!(cond.to_sql().unwrap_err().is_configuration(), "{:?}", cond);
        }
    }

    #[test]
    fn test_injection_is_escaped() {
        let sql = fc(
            "na\"me",
            FilterOp::Eq,
            FilterValue::String("'; DROP TABLE users; --".into()),
        )
        .to_sql()
        .unwrap();
        assert_eq!(sql, "\"na\"\"me\" = '''; DROP TABLE users; --'");
    }

    #[test]
    fn test_build_where_clause() {
        assert_eq!(build_where_clause(&[]).unwrap(), None);
        let clause = build_where_clause(&[
            fc("status", FilterOp::Eq, FilterValue::String("active".into())),
            fc("amount", FilterOp::Gt, FilterValue::Number(50.0)),
        ])
        .unwrap();
        assert_eq!(
            clause.as_deref(),
            Some("\"status\" = 'active' AND \"amount\" > 50")
        );
    }

    #[test]
    fn test_build_where_clause_fails_on_any_bad_condition() {
        let err = build_where_clause(&[
            fc("status", FilterOp::Eq, FilterValue::String("active".into())),
            fc("amount", FilterOp::Gt, FilterValue::None),
        ])
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{"column":"day","op":"between","value":["2024-01-01","2024-01-31"]}"#;
        let cond: FilterCondition = serde_json::from_str(json).unwrap();
        assert!(matches!(cond.value, FilterValue::Range(_)));

        let json = r#"{"column":"amount","op":"gt","value":42.5}"#;
        let cond: FilterCondition = serde_json::from_str(json).unwrap();
        assert!(matches!(cond.value, FilterValue::Number(n) if (n - 42.5).abs() < f64::EPSILON));

        let json = r#"{"column":"x","op":"is_null","value":null}"#;
        let cond: FilterCondition = serde_json::from_str(json).unwrap();
        assert_eq!(cond.op, FilterOp::IsNull);
        assert!(matches!(cond.value, FilterValue::None));
    }
}
