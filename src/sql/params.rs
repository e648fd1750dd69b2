//! Statement arguments and their PostgreSQL encoding.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;
use std::fmt;

/// A value bound to a `?` placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Untyped conversion; typed inputs go through the schema field kind instead.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(items) => SqlValue::Array(items.iter().map(SqlValue::from_json).collect()),
            Value::Object(_) => SqlValue::Json(v.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, SqlValue::Array(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used when an array mixes kinds and is bound as `text[]`.
    fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(n) => Some(n.to_string()),
            SqlValue::Float(n) => Some(n.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Timestamp(t) => Some(t.to_rfc3339()),
            SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            SqlValue::Json(v) => Some(v.to_string()),
            SqlValue::Array(_) => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            other => f.write_str(other.to_text().as_deref().unwrap_or("null")),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Float(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ArrayKind {
    fn of(items: &[SqlValue]) -> Self {
        let present = || items.iter().filter(|i| !i.is_null());
        if present().all(|i| matches!(i, SqlValue::Int(_))) {
            ArrayKind::Int
        } else if present().all(|i| matches!(i, SqlValue::Int(_) | SqlValue::Float(_))) {
            ArrayKind::Float
        } else if present().all(|i| matches!(i, SqlValue::Bool(_))) {
            ArrayKind::Bool
        } else {
            ArrayKind::Text
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ArrayKind::Int => "_INT8",
            ArrayKind::Float => "_FLOAT8",
            ArrayKind::Bool => "_BOOL",
            ArrayKind::Text => "_TEXT",
        }
    }
}

fn encode_array(
    items: &[SqlValue],
    buf: &mut <Postgres as Database>::ArgumentBuffer<'_>,
) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
    match ArrayKind::of(items) {
        ArrayKind::Int => {
            let v: Vec<Option<i64>> = items
                .iter()
                .map(|i| match i {
                    SqlValue::Int(n) => Some(*n),
                    _ => None,
                })
                .collect();
            <Vec<Option<i64>> as Encode<Postgres>>::encode_by_ref(&v, buf)
        }
        ArrayKind::Float => {
            let v: Vec<Option<f64>> = items
                .iter()
                .map(|i| match i {
                    SqlValue::Int(n) => Some(*n as f64),
                    SqlValue::Float(n) => Some(*n),
                    _ => None,
                })
                .collect();
            <Vec<Option<f64>> as Encode<Postgres>>::encode_by_ref(&v, buf)
        }
        ArrayKind::Bool => {
            let v: Vec<Option<bool>> = items
                .iter()
                .map(|i| match i {
                    SqlValue::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            <Vec<Option<bool>> as Encode<Postgres>>::encode_by_ref(&v, buf)
        }
        ArrayKind::Text => {
            let v: Vec<Option<String>> = items.iter().map(SqlValue::to_text).collect();
            <Vec<Option<String>> as Encode<Postgres>>::encode_by_ref(&v, buf)
        }
    }
}

impl<'q> Encode<'q, Postgres> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            SqlValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            SqlValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            SqlValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            SqlValue::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            SqlValue::Text(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            SqlValue::Timestamp(t) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(t, buf)?,
            SqlValue::Date(d) => <NaiveDate as Encode<Postgres>>::encode_by_ref(d, buf)?,
            SqlValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
            SqlValue::Array(items) => encode_array(items, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        let name = match self {
            SqlValue::Null => return None,
            SqlValue::Bool(_) => "BOOL",
            SqlValue::Int(_) => "INT8",
            SqlValue::Float(_) => "FLOAT8",
            SqlValue::Text(_) => "TEXT",
            SqlValue::Timestamp(_) => "TIMESTAMPTZ",
            SqlValue::Date(_) => "DATE",
            SqlValue::Json(_) => "JSONB",
            SqlValue::Array(items) => ArrayKind::of(items).type_name(),
        };
        Some(PgTypeInfo::with_name(name))
    }
}

impl sqlx::Type<Postgres> for SqlValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
