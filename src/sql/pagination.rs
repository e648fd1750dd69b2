//! Cursor pagination: page parsing, sort keys, cursor predicates and page info.

use crate::error::ActionError;
use crate::response::PageInfo;
use crate::schema::{Action, Model, OrderBy, SortDirection};
use crate::settings::RuntimeConfig;
use crate::sql::{quoted, ColumnRef, Fragment, QueryBuilder, SqlValue};
use serde_json::{Map, Value};

const HAS_NEXT: &str = "hasNext";
const TOTAL_COUNT: &str = "totalCount";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl Page {
    pub fn first(n: u32) -> Self {
        Page {
            first: Some(n),
            last: None,
            after: None,
            before: None,
        }
    }

    /// `last` pages read backwards from the end (or from `before`).
    pub fn is_backward(&self) -> bool {
        self.last.is_some()
    }

    pub fn size(&self) -> u32 {
        self.first.or(self.last).unwrap_or(crate::settings::DEFAULT_PAGE_SIZE)
    }
}

fn count_arg(args: &Map<String, Value>, key: &str, max: u32) -> Result<Option<u32>, ActionError> {
    let n = match args.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match n {
        Some(n) if n > 0 => Ok(Some(u32::try_from(n).unwrap_or(u32::MAX).min(max))),
        Some(n) => Err(ActionError::Validation(format!("{} must be positive, got {}", key, n))),
        None => Err(ActionError::Validation(format!("{} must be an integer", key))),
    }
}

fn cursor_arg(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ActionError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ActionError::Validation(format!("{} must be a cursor string", key))),
    }
}

/// Read `first`/`last`/`after`/`before`. Defaults to the configured page size going forward.
pub fn parse_page(args: &Map<String, Value>, config: &RuntimeConfig) -> Result<Page, ActionError> {
    let first = count_arg(args, "first", config.max_page_size)?;
    let last = count_arg(args, "last", config.max_page_size)?;
    if first.is_some() && last.is_some() {
        return Err(ActionError::Validation("first and last cannot be combined".into()));
    }
    let first = if first.is_none() && last.is_none() {
        Some(config.default_page_size.min(config.max_page_size))
    } else {
        first
    };
    Ok(Page {
        first,
        last,
        after: cursor_arg(args, "after")?,
        before: cursor_arg(args, "before")?,
    })
}

fn parse_direction(field: &str, v: &Value) -> Result<SortDirection, ActionError> {
    match v.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("asc") => Ok(SortDirection::Asc),
        Some("desc") => Ok(SortDirection::Desc),
        _ => Err(ActionError::Validation(format!(
            "orderBy.{} must be asc or desc",
            field
        ))),
    }
}

/// Request `orderBy` merged over the action's declared order, primary key last.
/// `orderBy` is a list of single-field objects: `[{"name": "asc"}, {"views": "desc"}]`.
pub fn sort_key(model: &Model, action: &Action, requested: Option<&Value>) -> Result<Vec<OrderBy>, ActionError> {
    let mut key = action.order_by.clone();
    let entries: Vec<&Map<String, Value>> = match requested {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| {
                i.as_object()
                    .ok_or_else(|| ActionError::Validation("orderBy entries must be objects".into()))
            })
            .collect::<Result<_, _>>()?,
        Some(Value::Object(map)) => vec![map],
        Some(_) => return Err(ActionError::Validation("orderBy must be a list".into())),
    };
    for entry in entries {
        for (field, direction) in entry {
            if !action.sortable.contains(field) {
                return Err(ActionError::Validation(format!("cannot order by {}", field)));
            }
            let direction = parse_direction(field, direction)?;
            match key.iter_mut().find(|o| o.field == *field) {
                Some(existing) => existing.direction = direction,
                None => key.push(OrderBy {
                    field: field.clone(),
                    direction,
                }),
            }
        }
    }
    if let Some(pk) = model.primary_key() {
        if !key.iter().any(|o| o.field == pk.name) {
            key.push(OrderBy {
                field: pk.name.clone(),
                direction: SortDirection::Asc,
            });
        }
    }
    Ok(key)
}

/// `(SELECT "<t>"."<col>" FROM "<t>" WHERE "<t>"."<pk>" IS NOT DISTINCT FROM ?)`
fn cursor_value(column: &ColumnRef, pk: &ColumnRef) -> String {
    format!(
        "(SELECT {} FROM {} WHERE {} IS NOT DISTINCT FROM ?)",
        column,
        quoted(&column.table),
        pk
    )
}

/// Rows strictly after (`forward`) or before the cursor row in sort order:
/// `(a > A OR (a = A AND b < B) OR (a = A AND b = B AND id > ID))`.
pub fn cursor_predicate(
    keys: &[(ColumnRef, SortDirection)],
    pk: &ColumnRef,
    cursor: &str,
    forward: bool,
) -> Fragment {
    let mut terms = Vec::with_capacity(keys.len());
    let mut args = Vec::new();
    for (i, (column, direction)) in keys.iter().enumerate() {
        let mut parts = Vec::with_capacity(i + 1);
        for (previous, _) in &keys[..i] {
            parts.push(format!(
                "{} IS NOT DISTINCT FROM {}",
                previous,
                cursor_value(previous, pk)
            ));
            args.push(SqlValue::from(cursor));
        }
        let op = match (forward, direction) {
            (true, SortDirection::Asc) | (false, SortDirection::Desc) => ">",
            _ => "<",
        };
        parts.push(format!("{} {} {}", column, op, cursor_value(column, pk)));
        args.push(SqlValue::from(cursor));
        terms.push(if parts.len() > 1 {
            format!("({})", parts.join(" AND "))
        } else {
            parts.join("")
        });
    }
    let sql = if terms.len() > 1 {
        format!("({})", terms.join(" OR "))
    } else {
        terms.join("")
    };
    Fragment::new(sql, args)
}

/// Order, dedupe, cursor-filter and limit `query`. Backward pages reverse every ORDER BY
/// direction so LIMIT keeps the rows nearest the cursor.
pub fn apply_page(query: &mut QueryBuilder, model: &Model, page: &Page, sort: &[OrderBy]) -> Result<(), ActionError> {
    let table = model.table();
    let pk = query.primary_key();
    let mut keys = Vec::with_capacity(sort.len());
    for o in sort {
        let field = model.field_or_err(&o.field)?;
        keys.push((ColumnRef::new(table.clone(), field.column()), o.direction));
    }
    for (column, direction) in &keys {
        query.distinct_on(column.clone());
        let direction = if page.is_backward() {
            direction.flipped()
        } else {
            *direction
        };
        query.order_by(column.clone(), direction);
    }
    if let Some(after) = &page.after {
        query.page_filter(cursor_predicate(&keys, &pk, after, true));
    }
    if let Some(before) = &page.before {
        query.page_filter(cursor_predicate(&keys, &pk, before, false));
    }
    query.limit(page.size());
    query.include_page_info();
    Ok(())
}

fn take_column(row: &mut Map<String, Value>, name: &str) -> Option<Value> {
    let key = row.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()?;
    row.remove(&key)
}

fn cursor_of(row: &Map<String, Value>, pk_column: &str) -> Option<String> {
    match row.get(pk_column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Strip the window columns from `rows` (in executed order), restore declared order for
/// backward pages and describe the page.
pub fn take_page_info(rows: &mut Vec<Map<String, Value>>, page: &Page, pk_column: &str) -> PageInfo {
    let mut has_next = false;
    let mut total_count = 0;
    let last_index = rows.len().saturating_sub(1);
    for (i, row) in rows.iter_mut().enumerate() {
        let next = take_column(row, HAS_NEXT);
        let count = take_column(row, TOTAL_COUNT);
        if i == 0 {
            total_count = count.and_then(|c| c.as_i64()).unwrap_or(0);
        }
        if i == last_index {
            has_next = next.and_then(|n| n.as_bool()).unwrap_or(false);
        }
    }
    if page.is_backward() {
        rows.reverse();
        has_next = page.before.is_some();
    }
    PageInfo {
        has_next_page: has_next,
        total_count,
        start_cursor: rows.first().and_then(|r| cursor_of(r, pk_column)),
        end_cursor: rows.last().and_then(|r| cursor_of(r, pk_column)),
    }
}
