//! Request input: split by action type, typed against the schema, and offered to the
//! condition compiler and evaluator as a value source.

use crate::context::{RequestContext, ValueDescriptor};
use crate::error::{ActionError, CompileError};
use crate::expr::{Operand, ValueSource};
use crate::schema::{Action, ActionType, FieldType, InputBehaviour, Schema};
use crate::settings::RuntimeConfig;
use crate::sql::{ArgumentSource, SqlValue};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The request payload split into filter, write and paging arguments.
///
/// | action | shape |
/// |--------|-------|
/// | get, delete | `{<unique field>: value}` |
/// | list | `{where, first, last, after, before, orderBy}` |
/// | create | `{<field>: value, <relationship>: {...}}` |
/// | update | `{where: {...}, values: {...}}` |
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestArgs {
    pub wheres: Map<String, Value>,
    pub values: Map<String, Value>,
    pub paging: Map<String, Value>,
}

fn object_at(obj: &Map<String, Value>, key: &str) -> Result<Map<String, Value>, ActionError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(ActionError::Validation(format!("{} must be an object", key))),
    }
}

impl RequestArgs {
    pub fn from_input(action_type: ActionType, input: &Value) -> Result<Self, ActionError> {
        let obj = match input {
            Value::Null => Map::new(),
            Value::Object(m) => m.clone(),
            _ => return Err(ActionError::Validation("action input must be an object".into())),
        };
        let mut args = RequestArgs::default();
        match action_type {
            ActionType::Get | ActionType::Delete => args.wheres = obj,
            ActionType::Create => args.values = obj,
            ActionType::List => {
                args.wheres = object_at(&obj, "where")?;
                args.paging = obj;
                args.paging.remove("where");
            }
            ActionType::Update => {
                args.wheres = object_at(&obj, "where")?;
                args.values = object_at(&obj, "values")?;
            }
        }
        Ok(args)
    }

    /// Explicit inputs are looked up among the filters first, then the written values.
    pub fn explicit(&self, name: &str) -> Option<&Value> {
        self.wheres.get(name).or_else(|| self.values.get(name))
    }
}

/// Follow `path` through nested objects.
pub fn lookup<'v>(obj: &'v Map<String, Value>, path: &[String]) -> Option<&'v Value> {
    let (first, rest) = path.split_first()?;
    let value = obj.get(first)?;
    if rest.is_empty() {
        return Some(value);
    }
    lookup(value.as_object()?, rest)
}

fn describe(kind: &FieldType) -> String {
    match kind {
        FieldType::Id => "an id".into(),
        FieldType::Text => "a string".into(),
        FieldType::Number => "an integer".into(),
        FieldType::Decimal => "a number".into(),
        FieldType::Boolean => "a boolean".into(),
        FieldType::Timestamp => "an RFC 3339 timestamp".into(),
        FieldType::Date => "a YYYY-MM-DD date".into(),
        FieldType::Enum(name) => format!("a {} value", name),
        FieldType::Model(name) => format!("a {} reference", name),
    }
}

/// Convert a JSON input to the argument bound for a field of `kind`. Arrays convert
/// element-wise.
pub fn typed_value(schema: &Schema, kind: &FieldType, value: &Value, name: &str) -> Result<SqlValue, ActionError> {
    let mismatch = || ActionError::Validation(format!("{} must be {}", name, describe(kind)));
    let converted = match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (_, Value::Array(items)) => SqlValue::Array(
            items
                .iter()
                .map(|item| typed_value(schema, kind, item, name))
                .collect::<Result<_, _>>()?,
        ),
        (FieldType::Id | FieldType::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (FieldType::Id, Value::Number(n)) => SqlValue::Text(n.to_string()),
        (FieldType::Enum(enum_name), Value::String(s)) => {
            let known = schema
                .find_enum(enum_name)
                .map(|e| e.values.contains(s))
                .unwrap_or(false);
            if !known {
                return Err(ActionError::Validation(format!(
                    "{}: {} is not a {} value",
                    name, s, enum_name
                )));
            }
            SqlValue::Text(s.clone())
        }
        (FieldType::Number, Value::Number(n)) => SqlValue::Int(n.as_i64().ok_or_else(mismatch)?),
        (FieldType::Decimal, Value::Number(n)) => SqlValue::Float(n.as_f64().ok_or_else(mismatch)?),
        (FieldType::Boolean, Value::Bool(b)) => SqlValue::Bool(*b),
        (FieldType::Timestamp, Value::String(s)) => SqlValue::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| mismatch())?,
        ),
        (FieldType::Date, Value::String(s)) => {
            SqlValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| mismatch())?)
        }
        _ => return Err(mismatch()),
    };
    Ok(converted)
}

/// Everything a condition can reference during one invocation: explicit inputs (already
/// typed), `ctx.*`, secrets and literals.
pub struct RequestValues<'a> {
    schema: &'a Schema,
    ctx: &'a RequestContext,
    config: &'a RuntimeConfig,
    explicit: HashMap<String, SqlValue>,
}

impl<'a> RequestValues<'a> {
    /// Fails when a required explicit input is missing or does not match its declared type.
    pub fn new(
        schema: &'a Schema,
        action: &Action,
        ctx: &'a RequestContext,
        config: &'a RuntimeConfig,
        args: &RequestArgs,
    ) -> Result<Self, ActionError> {
        let mut explicit = HashMap::new();
        for input in action
            .inputs
            .iter()
            .filter(|i| i.behaviour == InputBehaviour::Explicit)
        {
            let value = args.explicit(&input.name);
            if value.is_none() && !input.optional {
                return Err(ActionError::Validation(format!(
                    "missing required input: {}",
                    input.name
                )));
            }
            let converted = match (value, &input.input_type) {
                (None, _) => SqlValue::Null,
                (Some(v), Some(kind)) => typed_value(schema, kind, v, &input.name)?,
                (Some(v), None) => SqlValue::from_json(v),
            };
            explicit.insert(input.name.clone(), converted);
        }
        Ok(RequestValues {
            schema,
            ctx,
            config,
            explicit,
        })
    }

    fn explicit_input(&self, name: &str) -> Result<SqlValue, CompileError> {
        self.explicit
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnresolvableIdentifier(name.to_string()))
    }
}

impl ArgumentSource for RequestValues<'_> {
    type Arg = SqlValue;

    fn literal(&mut self, value: SqlValue) -> Result<SqlValue, CompileError> {
        Ok(value)
    }

    fn context(&mut self, descriptor: ValueDescriptor) -> Result<SqlValue, CompileError> {
        descriptor.resolve(self.ctx, self.config)
    }

    fn input(&mut self, name: &str) -> Result<SqlValue, CompileError> {
        self.explicit_input(name)
    }

    fn is_array(&self, arg: &SqlValue) -> bool {
        arg.is_array()
    }
}

impl ValueSource for RequestValues<'_> {
    fn value_of(&self, operand: &Operand) -> Result<SqlValue, CompileError> {
        if let Some(value) = operand.literal_value() {
            return Ok(value);
        }
        let path = operand.as_ident().unwrap_or_default();
        match path {
            [first, ..] if first == "ctx" => ValueDescriptor::from_context_path(path)?.resolve(self.ctx, self.config),
            [enum_name, value] => match self.schema.find_enum(enum_name) {
                Some(e) if e.values.contains(value) => Ok(SqlValue::Text(value.clone())),
                _ => Err(CompileError::UnresolvableIdentifier(path.join("."))),
            },
            [name] => self.explicit_input(name),
            _ => Err(CompileError::UnresolvableIdentifier(path.join("."))),
        }
    }
}
