//! Column references, joins and SQL fragments shared by every statement kind.

use crate::sql::SqlValue;
use std::fmt;

/// Quote identifier for PostgreSQL (identifiers come from the validated schema).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `"<alias>"."<column>"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        ColumnRef {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn sql(&self) -> String {
        format!("{}.{}", quoted(&self.table), quoted(&self.column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// `<kind> JOIN "<table>" AS "<alias>" ON <left> = <right>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

impl Join {
    pub fn sql(&self) -> String {
        let kind = match self.kind {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
        };
        format!("{} JOIN {} ON {}", kind, self.source_sql(), self.condition_sql())
    }

    /// `"<table>" AS "<alias>"`, as listed in `UPDATE ... FROM` and `DELETE ... USING`.
    pub fn source_sql(&self) -> String {
        format!("{} AS {}", quoted(&self.table), quoted(&self.alias))
    }

    pub fn condition_sql(&self) -> String {
        format!("{} = {}", self.left, self.right)
    }
}

/// Push `join` unless an identical clause is already present.
pub fn push_join(joins: &mut Vec<Join>, join: Join) {
    if !joins.iter().any(|j| j.sql() == join.sql()) {
        joins.push(join);
    }
}

/// A piece of SQL and the arguments for its placeholders, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment<A = SqlValue> {
    pub sql: String,
    pub args: Vec<A>,
}

impl<A> Fragment<A> {
    pub fn new(sql: impl Into<String>, args: Vec<A>) -> Self {
        Fragment {
            sql: sql.into(),
            args,
        }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Fragment::new(sql, Vec::new())
    }
}

/// Resolved operand of a generated predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOperand {
    Column(ColumnRef),
    Value(SqlValue),
    Raw(String),
}

impl QueryOperand {
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        QueryOperand::Column(ColumnRef::new(table, column))
    }

    pub fn to_fragment(&self) -> Fragment {
        match self {
            QueryOperand::Column(c) => Fragment::raw(c.sql()),
            QueryOperand::Value(v) => Fragment::new("?", vec![v.clone()]),
            QueryOperand::Raw(sql) => Fragment::raw(sql.clone()),
        }
    }

    /// `<self> <op> <rhs>` with arguments in left-to-right order.
    pub fn compare(&self, op: &str, rhs: &QueryOperand) -> Fragment {
        let l = self.to_fragment();
        let r = rhs.to_fragment();
        let mut args = l.args;
        args.extend(r.args);
        Fragment::new(format!("{} {} {}", l.sql, op, r.sql), args)
    }
}
