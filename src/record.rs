//! Schema-typed rows. Rows leave the executor as JSON maps keyed by column; the pipeline
//! turns them into records keyed by field name.

use crate::case::to_camel_case;
use crate::schema::{FieldType, Model};
use crate::sql::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One row as returned by the executor: column name -> JSON cell.
pub type Row = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Id(String),
    Text(String),
    Number(i64),
    Decimal(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Enum(String),
    /// Columns without a declared field, or cells that did not match the declared kind.
    Extra(Value),
    /// Embedded belongs-to or has-one record.
    Embedded(Record),
    /// Embedded has-many records.
    EmbeddedList(Vec<Record>),
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

impl FieldValue {
    pub fn decode(field_type: &FieldType, value: Value) -> Self {
        let decoded = match (field_type, &value) {
            (_, Value::Null) => Some(FieldValue::Null),
            (FieldType::Id, Value::String(s)) => Some(FieldValue::Id(s.clone())),
            (FieldType::Id, Value::Number(n)) => Some(FieldValue::Id(n.to_string())),
            (FieldType::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (FieldType::Enum(_), Value::String(s)) => Some(FieldValue::Enum(s.clone())),
            (FieldType::Number, Value::Number(n)) => n.as_i64().map(FieldValue::Number),
            (FieldType::Number, Value::String(s)) => s.parse().ok().map(FieldValue::Number),
            (FieldType::Decimal, Value::Number(n)) => n.as_f64().map(FieldValue::Decimal),
            (FieldType::Decimal, Value::String(s)) => s.parse().ok().map(FieldValue::Decimal),
            (FieldType::Boolean, Value::Bool(b)) => Some(FieldValue::Boolean(*b)),
            (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s).map(FieldValue::Timestamp),
            (FieldType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(FieldValue::Date),
            _ => None,
        };
        decoded.unwrap_or(FieldValue::Extra(value))
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            FieldValue::Null => SqlValue::Null,
            FieldValue::Id(s) | FieldValue::Text(s) | FieldValue::Enum(s) => SqlValue::Text(s.clone()),
            FieldValue::Number(n) => SqlValue::Int(*n),
            FieldValue::Decimal(n) => SqlValue::Float(*n),
            FieldValue::Boolean(b) => SqlValue::Bool(*b),
            FieldValue::Timestamp(t) => SqlValue::Timestamp(*t),
            FieldValue::Date(d) => SqlValue::Date(*d),
            FieldValue::Extra(v) => SqlValue::from_json(v),
            FieldValue::Embedded(_) | FieldValue::EmbeddedList(_) => SqlValue::Null,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

impl Record {
    pub fn from_row(model: &Model, row: Row) -> Self {
        let mut fields = BTreeMap::new();
        for (column, value) in row {
            match model.field_for_column(&column) {
                Some(field) => {
                    fields.insert(field.name.clone(), FieldValue::decode(&field.field_type, value));
                }
                None => {
                    fields.insert(to_camel_case(&column), FieldValue::Extra(value));
                }
            }
        }
        Record(fields)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
