//! Query plan for one action invocation, rendered into a [`Statement`].
//!
//! A builder is scoped to one model and only ever appended to: filters are ANDed, joins
//! are deduplicated by their rendered clause, and rendering never mutates the plan, so
//! rendering twice yields the same statement.

use crate::error::CompileError;
use crate::schema::{Model, SortDirection};
use crate::sql::{push_join, quoted, ColumnRef, Fragment, Join, SqlValue, Statement};
use std::collections::{BTreeMap, HashMap};

/// Values written by an insert or update, with nested relationship creates.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteValues {
    table: String,
    primary_key: String,
    columns: BTreeMap<String, SqlValue>,
    belongs_to: Vec<(String, WriteValues)>,
    has_many: Vec<(String, WriteValues)>,
}

impl WriteValues {
    pub fn new(model: &Model) -> Self {
        WriteValues {
            table: model.table(),
            primary_key: model.primary_key_column(),
            columns: BTreeMap::new(),
            belongs_to: Vec::new(),
            has_many: Vec::new(),
        }
    }

    /// Set a column. A direct value for a foreign key replaces any nested create behind it.
    pub fn set(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        self.belongs_to.retain(|(fk, _)| *fk != column);
        self.columns.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> &BTreeMap<String, SqlValue> {
        &self.columns
    }

    /// Create the related row first and point `fk_column` at it.
    pub fn nest_belongs_to(&mut self, fk_column: impl Into<String>, related: WriteValues) {
        let fk_column = fk_column.into();
        self.columns.remove(&fk_column);
        match self.belongs_to.iter_mut().find(|(fk, _)| *fk == fk_column) {
            Some((_, existing)) => *existing = related,
            None => self.belongs_to.push((fk_column, related)),
        }
    }

    /// Create `child` after this row, with `fk_column` on the child pointing back here.
    pub fn push_has_many(&mut self, fk_column: impl Into<String>, child: WriteValues) {
        self.has_many.push((fk_column.into(), child));
    }

    pub fn nested_mut(&mut self, fk_column: &str) -> Option<&mut WriteValues> {
        self.belongs_to
            .iter_mut()
            .find(|(fk, _)| fk == fk_column)
            .map(|(_, nested)| nested)
    }

    pub fn has_nested(&self) -> bool {
        !self.belongs_to.is_empty() || !self.has_many.is_empty()
    }
}

/// Decomposes a write tree into one CTE per inserted row.
#[derive(Default)]
struct InsertPlan {
    ctes: Vec<String>,
    args: Vec<SqlValue>,
    seq: HashMap<String, usize>,
}

enum Cell<'a> {
    Value(&'a SqlValue),
    Ref(String),
}

impl InsertPlan {
    /// Belongs-to creates first, then the row itself, then its has-many children.
    /// Returns the CTE name of the row.
    fn plan(&mut self, values: &WriteValues, parent: Option<(&str, &str, &str)>) -> String {
        let mut refs: Vec<(&str, String)> = Vec::new();
        for (fk, nested) in &values.belongs_to {
            let name = self.plan(nested, None);
            refs.push((fk.as_str(), format!("(SELECT {} FROM {})", nested.primary_key, name)));
        }
        if let Some((fk, parent_cte, parent_pk)) = parent {
            refs.push((fk, format!("(SELECT {} FROM {})", parent_pk, parent_cte)));
        }

        let mut cells: BTreeMap<&str, Cell> = values
            .columns
            .iter()
            .map(|(c, v)| (c.as_str(), Cell::Value(v)))
            .collect();
        for (column, sql) in refs {
            cells.insert(column, Cell::Ref(sql));
        }

        let n = self.seq.entry(values.table.clone()).or_insert(0);
        *n += 1;
        let name = format!("new_{}_{}", n, values.table);

        let body = if cells.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted(&values.table))
        } else {
            let mut cols = Vec::with_capacity(cells.len());
            let mut vals = Vec::with_capacity(cells.len());
            for (column, cell) in cells {
                cols.push(quoted(column));
                match cell {
                    Cell::Value(v) => {
                        self.args.push(v.clone());
                        vals.push("?".to_string());
                    }
                    Cell::Ref(sql) => vals.push(sql),
                }
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                quoted(&values.table),
                cols.join(", "),
                vals.join(", ")
            )
        };
        self.ctes.push(format!("{} AS ({})", name, body));

        for (fk, child) in &values.has_many {
            self.plan(child, Some((fk.as_str(), name.as_str(), values.primary_key.as_str())));
        }
        name
    }
}

#[derive(Clone, Debug)]
pub struct QueryBuilder {
    table: String,
    primary_key: String,
    selection: Vec<String>,
    distinct_on: Vec<ColumnRef>,
    joins: Vec<Join>,
    filters: Vec<Fragment>,
    paging: Vec<Fragment>,
    order_by: Vec<(ColumnRef, SortDirection)>,
    group_by: Vec<ColumnRef>,
    limit: Option<u32>,
    page_info: bool,
    write: WriteValues,
    returning: Vec<String>,
}

impl QueryBuilder {
    pub fn new(model: &Model) -> Self {
        QueryBuilder {
            table: model.table(),
            primary_key: model.primary_key_column(),
            selection: Vec::new(),
            distinct_on: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            paging: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            page_info: false,
            write: WriteValues::new(model),
            returning: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> ColumnRef {
        ColumnRef::new(self.table.clone(), self.primary_key.clone())
    }

    pub fn select(&mut self, sql: impl Into<String>) {
        self.selection.push(sql.into());
    }

    /// `"<table>".*`
    pub fn select_all(&mut self) {
        self.select(format!("{}.*", quoted(&self.table)));
    }

    pub fn distinct_on(&mut self, column: ColumnRef) {
        if !self.distinct_on.contains(&column) {
            self.distinct_on.push(column);
        }
    }

    pub fn join(&mut self, join: Join) {
        push_join(&mut self.joins, join);
    }

    /// AND a predicate into the WHERE clause.
    pub fn filter(&mut self, fragment: Fragment) {
        self.filters.push(fragment);
    }

    /// Cursor predicate; ANDed into the page query but not into the total count.
    pub fn page_filter(&mut self, fragment: Fragment) {
        self.paging.push(fragment);
    }

    pub fn order_by(&mut self, column: ColumnRef, direction: SortDirection) {
        if !self.order_by.iter().any(|(c, _)| *c == column) {
            self.order_by.push((column, direction));
        }
    }

    pub fn group_by(&mut self, column: ColumnRef) {
        if !self.group_by.contains(&column) {
            self.group_by.push(column);
        }
    }

    pub fn limit(&mut self, n: u32) {
        self.limit = Some(n);
    }

    /// Add the `hasNext` and `totalCount` window columns to the select.
    pub fn include_page_info(&mut self) {
        self.page_info = true;
    }

    pub fn write_values(&self) -> &WriteValues {
        &self.write
    }

    pub fn write_values_mut(&mut self) -> &mut WriteValues {
        &mut self.write
    }

    pub fn set_write_values(&mut self, values: WriteValues) {
        self.write = values;
    }

    pub fn returning(&mut self, sql: impl Into<String>) {
        self.returning.push(sql.into());
    }

    fn from_sql(&self) -> String {
        let mut sql = quoted(&self.table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.sql());
        }
        sql
    }

    fn where_sql(&self, with_paging: bool, join_conditions: bool, args: &mut Vec<SqlValue>) -> String {
        let mut where_parts = Vec::new();
        if join_conditions {
            where_parts.extend(self.joins.iter().map(Join::condition_sql));
        }
        let paging: &[Fragment] = if with_paging { &self.paging } else { &[] };
        for f in self.filters.iter().chain(paging) {
            where_parts.push(f.sql.clone());
            args.extend(f.args.iter().cloned());
        }
        if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        }
    }

    fn order_sql(&self) -> String {
        self.order_by
            .iter()
            .map(|(c, d)| format!("{} {}", c, d.sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn returning_sql(&self, default: String) -> String {
        if self.returning.is_empty() {
            default
        } else {
            self.returning.join(", ")
        }
    }

    pub fn to_select(&self) -> Statement {
        let mut args = Vec::new();
        let mut sql = String::from("SELECT ");
        if !self.distinct_on.is_empty() {
            let cols: Vec<String> = self.distinct_on.iter().map(ColumnRef::sql).collect();
            sql.push_str(&format!("DISTINCT ON({}) ", cols.join(", ")));
        }
        let mut select_parts = if self.selection.is_empty() {
            vec![format!("{}.*", quoted(&self.table))]
        } else {
            self.selection.clone()
        };
        if self.page_info {
            let order = if self.order_by.is_empty() {
                format!("{} ASC", self.primary_key())
            } else {
                self.order_sql()
            };
            select_parts.push(format!(
                "CASE WHEN LEAD({}) OVER (ORDER BY {}) IS NOT NULL THEN true ELSE false END AS hasNext",
                self.primary_key(),
                order
            ));
            let counted: Vec<String> = if self.distinct_on.is_empty() {
                vec![self.primary_key().sql()]
            } else {
                self.distinct_on.iter().map(ColumnRef::sql).collect()
            };
            let counted = if counted.len() > 1 {
                format!("({})", counted.join(", "))
            } else {
                counted.join("")
            };
            let count_where = self.where_sql(false, false, &mut args);
            select_parts.push(format!(
                "(SELECT COUNT(DISTINCT {}) FROM {}{}) AS totalCount",
                counted,
                self.from_sql(),
                count_where
            ));
        }
        sql.push_str(&select_parts.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&self.from_sql());
        sql.push_str(&self.where_sql(true, false, &mut args));
        if !self.group_by.is_empty() {
            let cols: Vec<String> = self.group_by.iter().map(ColumnRef::sql).collect();
            sql.push_str(&format!(" GROUP BY {}", cols.join(", ")));
        }
        if !self.order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order_sql()));
        }
        if let Some(n) = self.limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlValue::Int(i64::from(n)));
        }
        Statement::new(sql, args)
    }

    /// Distinct primary keys of the rows the filters match; used to authorize a write
    /// before it happens.
    pub fn to_select_keys(&self) -> Statement {
        let mut args = Vec::new();
        let where_clause = self.where_sql(false, false, &mut args);
        Statement::new(
            format!(
                "SELECT DISTINCT {} FROM {}{}",
                self.primary_key(),
                self.from_sql(),
                where_clause
            ),
            args,
        )
    }

    pub fn to_insert(&self) -> Statement {
        let mut plan = InsertPlan::default();
        let root = plan.plan(&self.write, None);
        Statement::new(
            format!("WITH {} SELECT * FROM {}", plan.ctes.join(", "), root),
            plan.args,
        )
    }

    /// With nothing to set, the matched rows are selected instead so the caller still
    /// receives them.
    pub fn to_update(&self) -> Result<Statement, CompileError> {
        if self.write.has_nested() {
            return Err(CompileError::InvalidAssignment(
                "nested relationship writes are only supported on create".into(),
            ));
        }
        let mut args = Vec::new();
        if self.write.columns.is_empty() {
            let where_clause = self.where_sql(false, false, &mut args);
            return Ok(Statement::new(
                format!(
                    "SELECT DISTINCT ON({}) {}.* FROM {}{}",
                    self.primary_key(),
                    quoted(&self.table),
                    self.from_sql(),
                    where_clause
                ),
                args,
            ));
        }
        let sets: Vec<String> = self
            .write
            .columns
            .iter()
            .map(|(column, value)| {
                args.push(value.clone());
                format!("{} = ?", quoted(column))
            })
            .collect();
        let from_clause = if self.joins.is_empty() {
            String::new()
        } else {
            let sources: Vec<String> = self.joins.iter().map(Join::source_sql).collect();
            format!(" FROM {}", sources.join(", "))
        };
        let where_clause = self.where_sql(false, true, &mut args);
        let returning = self.returning_sql(format!("{}.*", quoted(&self.table)));
        Ok(Statement::new(
            format!(
                "UPDATE {} SET {}{}{} RETURNING {}",
                quoted(&self.table),
                sets.join(", "),
                from_clause,
                where_clause,
                returning
            ),
            args,
        ))
    }

    pub fn to_delete(&self) -> Statement {
        let mut args = Vec::new();
        let using_clause = if self.joins.is_empty() {
            String::new()
        } else {
            let sources: Vec<String> = self.joins.iter().map(Join::source_sql).collect();
            format!(" USING {}", sources.join(", "))
        };
        let where_clause = self.where_sql(false, true, &mut args);
        let returning = self.returning_sql(self.primary_key().sql());
        Statement::new(
            format!(
                "DELETE FROM {}{}{} RETURNING {}",
                quoted(&self.table),
                using_clause,
                where_clause,
                returning
            ),
            args,
        )
    }
}
