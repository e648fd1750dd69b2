//! Filters contributed by implicit read inputs and by the action's `@where` expressions.

use crate::error::ActionError;
use crate::schema::{Action, ActionType, FieldType, InputBehaviour, InputMode, Model, Schema};
use crate::service::args::{lookup, typed_value, RequestArgs, RequestValues};
use crate::sql::resolve::resolve_path;
use crate::sql::{ColumnRef, ConditionCompiler, Fragment, JoinKind, QueryBuilder, QueryOperand, SqlValue};
use serde_json::Value;

/// List filter operators accepted for each field type.
pub fn filter_operators(kind: &FieldType) -> &'static [&'static str] {
    match kind {
        FieldType::Text => &["equals", "contains", "startsWith", "endsWith", "oneOf"],
        FieldType::Number | FieldType::Decimal => &[
            "equals",
            "lessThan",
            "lessThanOrEquals",
            "greaterThan",
            "greaterThanOrEquals",
            "oneOf",
        ],
        FieldType::Boolean => &["equals"],
        FieldType::Timestamp | FieldType::Date => &["equals", "before", "onOrBefore", "after", "onOrAfter"],
        FieldType::Id | FieldType::Enum(_) => &["equals", "oneOf"],
        FieldType::Model(_) => &[],
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn pattern(value: &Value, name: &str, make: impl Fn(&str) -> String) -> Result<SqlValue, ActionError> {
    value
        .as_str()
        .map(|s| SqlValue::Text(make(&escape_like(s))))
        .ok_or_else(|| ActionError::Validation(format!("{} must be a string", name)))
}

/// One list filter such as `{"startsWith": "bo"}` against `column`.
fn list_filter(
    schema: &Schema,
    column: &ColumnRef,
    kind: &FieldType,
    operator: &str,
    value: &Value,
    name: &str,
) -> Result<Fragment, ActionError> {
    if !filter_operators(kind).iter().any(|op| *op == operator) {
        return Err(ActionError::Validation(format!(
            "{} is not a valid filter for {}",
            operator, name
        )));
    }
    let col = QueryOperand::Column(column.clone());
    let label = format!("{}.{}", name, operator);
    let fragment = match operator {
        "equals" => {
            if value.is_array() {
                return Err(ActionError::Validation(format!("{} cannot be a list", label)));
            }
            col.compare(
                "IS NOT DISTINCT FROM",
                &QueryOperand::Value(typed_value(schema, kind, value, &label)?),
            )
        }
        "contains" => col.compare("LIKE", &QueryOperand::Value(pattern(value, &label, |s| format!("%{}%", s))?)),
        "startsWith" => col.compare("LIKE", &QueryOperand::Value(pattern(value, &label, |s| format!("{}%", s))?)),
        "endsWith" => col.compare("LIKE", &QueryOperand::Value(pattern(value, &label, |s| format!("%{}", s))?)),
        "oneOf" => {
            let items = match typed_value(schema, kind, value, &label)? {
                SqlValue::Array(items) => items,
                _ => return Err(ActionError::Validation(format!("{} must be a list", label))),
            };
            if items.is_empty() {
                Fragment::raw("false")
            } else {
                let placeholders = vec!["?"; items.len()].join(", ");
                Fragment::new(format!("{} IN ({})", column, placeholders), items)
            }
        }
        _ => {
            let op = match operator {
                "lessThan" | "before" => "<",
                "lessThanOrEquals" | "onOrBefore" => "<=",
                "greaterThan" | "after" => ">",
                _ => ">=",
            };
            let bound = typed_value(schema, kind, value, &label)?;
            if bound.is_array() {
                return Err(ActionError::Validation(format!("{} cannot be a list", label)));
            }
            col.compare(op, &QueryOperand::Value(bound))
        }
    };
    Ok(fragment)
}

/// AND one predicate per implicit read input into `query`. Get, update and delete match
/// inputs by equality; list inputs carry a filter object per field.
pub fn apply_implicit_filters(
    schema: &Schema,
    model: &Model,
    action: &Action,
    args: &RequestArgs,
    query: &mut QueryBuilder,
) -> Result<(), ActionError> {
    let inputs = action
        .inputs
        .iter()
        .filter(|i| i.behaviour == InputBehaviour::Implicit && i.mode == InputMode::Read);
    for input in inputs {
        let value = lookup(&args.wheres, &input.target).or_else(|| args.wheres.get(&input.name));
        let Some(value) = value else {
            if input.optional || action.action_type == ActionType::List {
                continue;
            }
            return Err(ActionError::Validation(format!("missing required input: {}", input.name)));
        };
        let resolved = resolve_path(schema, model, &input.target, JoinKind::Inner)?;
        let kind = resolved.field.field_type.clone();
        let column = resolved.column;
        for join in resolved.joins {
            query.join(join);
        }
        if action.action_type == ActionType::List {
            let filters = match value {
                Value::Object(filters) => filters,
                Value::Null => continue,
                _ => {
                    return Err(ActionError::Validation(format!(
                        "{} must be a filter object",
                        input.name
                    )))
                }
            };
            for (operator, operand) in filters {
                query.filter(list_filter(schema, &column, &kind, operator, operand, &input.name)?);
            }
        } else {
            let bound = typed_value(schema, &kind, value, &input.name)?;
            query.filter(
                QueryOperand::Column(column).compare("IS NOT DISTINCT FROM", &QueryOperand::Value(bound)),
            );
        }
    }
    Ok(())
}

/// AND each `@where` expression into `query`, adding the joins it needs.
pub fn apply_explicit_filters(
    schema: &Schema,
    model: &Model,
    action: &Action,
    values: &mut RequestValues<'_>,
    query: &mut QueryBuilder,
) -> Result<(), ActionError> {
    for condition in &action.where_expressions {
        let mut compiler = ConditionCompiler::for_query(schema, model, values);
        let fragment = compiler.compile(condition)?;
        for join in compiler.joins() {
            query.join(join.clone());
        }
        query.filter(fragment);
    }
    Ok(())
}
