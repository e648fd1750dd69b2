//! Compile condition trees into SQL boolean fragments.
//!
//! One compiler serves both query filters (values bound immediately, inner joins) and
//! permission queries (values deferred as descriptors, left joins, to-many columns
//! aggregated). The difference lives in the [`ArgumentSource`] and two flags.

use crate::context::ValueDescriptor;
use crate::error::CompileError;
use crate::expr::{Comparison, Condition, ConditionVisitor, Operand, Operator};
use crate::schema::{Model, Schema};
use crate::sql::resolve::resolve_path;
use crate::sql::{push_join, ColumnRef, Fragment, Join, JoinKind, SqlValue};

/// Produces the argument bound to each placeholder the compiler emits.
pub trait ArgumentSource {
    type Arg: Clone;

    /// Render `true`/`false`/`null` literals inline instead of binding them.
    fn inline_constants(&self) -> bool {
        false
    }

    fn literal(&mut self, value: SqlValue) -> Result<Self::Arg, CompileError>;

    fn context(&mut self, descriptor: ValueDescriptor) -> Result<Self::Arg, CompileError>;

    /// Value of the explicit input `name`.
    fn input(&mut self, name: &str) -> Result<Self::Arg, CompileError>;

    fn is_array(&self, arg: &Self::Arg) -> bool;
}

/// Compiled boolean expression plus how many leaves it spans.
#[derive(Debug)]
pub struct Compiled<A> {
    sql: String,
    args: Vec<A>,
    leaves: usize,
}

enum Side<A> {
    Scalar(Fragment<A>),
    /// Column reached through a repeated relationship.
    Many(Fragment<A>),
    /// Literal array, one placeholder per element.
    List(Vec<Fragment<A>>),
    /// A single bound argument holding an array.
    ArrayValue(Fragment<A>),
}

pub struct ConditionCompiler<'a, S: ArgumentSource> {
    schema: &'a Schema,
    model: &'a Model,
    join_kind: JoinKind,
    aggregate_many: bool,
    source: &'a mut S,
    joins: Vec<Join>,
    grouped: Vec<ColumnRef>,
}

impl<'a, S: ArgumentSource> ConditionCompiler<'a, S> {
    /// Filters for the action's own statement: inner joins, to-many columns join-exploded.
    pub fn for_query(schema: &'a Schema, model: &'a Model, source: &'a mut S) -> Self {
        Self::new(schema, model, source, JoinKind::Inner, false)
    }

    /// Permission expressions: left joins, to-many columns aggregated with `ARRAY_AGG`.
    pub fn for_permissions(schema: &'a Schema, model: &'a Model, source: &'a mut S) -> Self {
        Self::new(schema, model, source, JoinKind::Left, true)
    }

    fn new(
        schema: &'a Schema,
        model: &'a Model,
        source: &'a mut S,
        join_kind: JoinKind,
        aggregate_many: bool,
    ) -> Self {
        ConditionCompiler {
            schema,
            model,
            join_kind,
            aggregate_many,
            source,
            joins: Vec::new(),
            grouped: Vec::new(),
        }
    }

    pub fn compile(&mut self, condition: &Condition) -> Result<Fragment<S::Arg>, CompileError> {
        let compiled = condition.accept(self)?;
        Ok(Fragment::new(compiled.sql, compiled.args))
    }

    /// Joins required by everything compiled so far, deduplicated, in first-use order.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Joined columns read without aggregation; permission queries group by them.
    pub fn grouped_columns(&self) -> &[ColumnRef] {
        &self.grouped
    }

    fn operand(&mut self, operand: &Operand) -> Result<Side<S::Arg>, CompileError> {
        match operand {
            Operand::Ident(path) => self.identifier(path),
            Operand::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Operand::Ident(_) | Operand::Array(_) => {
                            return Err(CompileError::UnsupportedArray(format!(
                                "array elements must be literals, found {}",
                                item
                            )))
                        }
                        _ => out.push(self.constant(item)?),
                    }
                }
                Ok(Side::List(out))
            }
            _ => Ok(Side::Scalar(self.constant(operand)?)),
        }
    }

    fn constant(&mut self, operand: &Operand) -> Result<Fragment<S::Arg>, CompileError> {
        if self.source.inline_constants() {
            match operand {
                Operand::Bool(true) => return Ok(Fragment::raw("true")),
                Operand::Bool(false) => return Ok(Fragment::raw("false")),
                Operand::Null => return Ok(Fragment::raw("null")),
                _ => {}
            }
        }
        let value = operand
            .literal_value()
            .ok_or_else(|| CompileError::UnresolvableIdentifier(operand.to_string()))?;
        Ok(Fragment::new("?", vec![self.source.literal(value)?]))
    }

    fn identifier(&mut self, path: &[String]) -> Result<Side<S::Arg>, CompileError> {
        let first = path.first().map(String::as_str).unwrap_or_default();
        if first == "ctx" {
            let descriptor = ValueDescriptor::from_context_path(path)?;
            let sql = match descriptor {
                ValueDescriptor::IsAuthenticated => "?::boolean",
                _ => "?",
            };
            let arg = self.source.context(descriptor)?;
            return Ok(Side::Scalar(Fragment::new(sql, vec![arg])));
        }
        if path.len() > 1 && first == self.model.expression_root() {
            let resolved = resolve_path(self.schema, self.model, &path[1..], self.join_kind)?;
            let joined = !resolved.joins.is_empty();
            for join in resolved.joins {
                push_join(&mut self.joins, join);
            }
            let column = resolved.column;
            if resolved.through_many {
                let sql = if self.aggregate_many {
                    format!("ARRAY_AGG({})", column)
                } else {
                    column.sql()
                };
                return Ok(Side::Many(Fragment::raw(sql)));
            }
            if joined && self.aggregate_many && !self.grouped.contains(&column) {
                self.grouped.push(column.clone());
            }
            return Ok(Side::Scalar(Fragment::raw(column.sql())));
        }
        if path.len() == 2 {
            if let Some(e) = self.schema.find_enum(first) {
                if !e.values.contains(&path[1]) {
                    return Err(CompileError::UnresolvableIdentifier(path.join(".")));
                }
                let arg = self.source.literal(SqlValue::Text(path[1].clone()))?;
                return Ok(Side::Scalar(Fragment::new("?", vec![arg])));
            }
        }
        if path.len() == 1 {
            let arg = self.source.input(first)?;
            let fragment = Fragment::new("?", vec![arg]);
            return Ok(if self.source.is_array(&fragment.args[0]) {
                Side::ArrayValue(fragment)
            } else {
                Side::Scalar(fragment)
            });
        }
        Err(CompileError::UnresolvableIdentifier(path.join(".")))
    }

    fn comparison(
        &self,
        op: Operator,
        lhs: Side<S::Arg>,
        rhs: Side<S::Arg>,
    ) -> Result<Fragment<S::Arg>, CompileError> {
        let lhs = match lhs {
            Side::Scalar(f) => f,
            Side::Many(f) if !self.aggregate_many => f,
            Side::Many(_) => {
                return Err(CompileError::UnsupportedArray(format!(
                    "to-many fields may only appear on the right of in/not in, not left of {}",
                    op
                )))
            }
            Side::List(_) | Side::ArrayValue(_) => {
                return Err(CompileError::UnsupportedArray(format!("array on the left of {}", op)))
            }
        };
        let sql_op = match op {
            Operator::Equals => "IS NOT DISTINCT FROM",
            Operator::NotEquals => "IS DISTINCT FROM",
            Operator::LessThan => "<",
            Operator::LessThanOrEquals => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEquals => ">=",
            Operator::In | Operator::NotIn => return self.membership(op, lhs, rhs),
            Operator::Assign => {
                return Err(CompileError::UnsupportedOperator {
                    operator: op.to_string(),
                    reason: "assignment inside a condition".into(),
                })
            }
        };
        let rhs = match rhs {
            Side::Scalar(f) => f,
            Side::Many(f) if !self.aggregate_many => f,
            _ => {
                return Err(CompileError::UnsupportedArray(format!(
                    "arrays cannot be compared with {}",
                    op
                )))
            }
        };
        Ok(binary(lhs, sql_op, rhs))
    }

    fn membership(
        &self,
        op: Operator,
        lhs: Fragment<S::Arg>,
        rhs: Side<S::Arg>,
    ) -> Result<Fragment<S::Arg>, CompileError> {
        let negate = op == Operator::NotIn;
        match rhs {
            Side::List(items) if items.is_empty() => Ok(Fragment::raw(if negate { "true" } else { "false" })),
            Side::List(items) => {
                let mut args = lhs.args;
                let mut placeholders = Vec::with_capacity(items.len());
                for item in items {
                    placeholders.push(item.sql);
                    args.extend(item.args);
                }
                let keyword = if negate { "NOT IN" } else { "IN" };
                Ok(Fragment::new(
                    format!("{} {} ({})", lhs.sql, keyword, placeholders.join(", ")),
                    args,
                ))
            }
            Side::Many(f) if !self.aggregate_many => {
                if negate {
                    return Err(CompileError::UnsupportedArray(
                        "not in against a to-many relationship".into(),
                    ));
                }
                Ok(binary(lhs, "IS NOT DISTINCT FROM", f))
            }
            Side::Many(f) | Side::ArrayValue(f) => {
                let any = binary(lhs, "=", Fragment::new(format!("ANY({})", f.sql), f.args));
                Ok(if negate {
                    Fragment::new(format!("NOT ({})", any.sql), any.args)
                } else {
                    any
                })
            }
            Side::Scalar(_) => Err(CompileError::TypeMismatch(format!(
                "right side of {} must be an array",
                op
            ))),
        }
    }
}

fn binary<A>(lhs: Fragment<A>, op: &str, rhs: Fragment<A>) -> Fragment<A> {
    let mut args = lhs.args;
    args.extend(rhs.args);
    Fragment::new(format!("{} {} {}", lhs.sql, op, rhs.sql), args)
}

impl<S: ArgumentSource> ConditionVisitor for ConditionCompiler<'_, S> {
    type Output = Compiled<S::Arg>;
    type Error = CompileError;

    fn visit_leaf(&mut self, leaf: &Comparison) -> Result<Self::Output, CompileError> {
        let lhs = self.operand(&leaf.lhs)?;
        let fragment = match (leaf.operator, &leaf.rhs) {
            (None, None) => match lhs {
                Side::Scalar(f) => f,
                _ => {
                    return Err(CompileError::TypeMismatch(format!(
                        "{} is not a boolean value",
                        leaf.lhs
                    )))
                }
            },
            (Some(op), Some(rhs)) => {
                let rhs = self.operand(rhs)?;
                self.comparison(op, lhs, rhs)?
            }
            _ => {
                return Err(CompileError::TypeMismatch(format!(
                    "incomplete comparison on {}",
                    leaf.lhs
                )))
            }
        };
        Ok(Compiled {
            sql: fragment.sql,
            args: fragment.args,
            leaves: 1,
        })
    }

    fn visit_and(&mut self, terms: Vec<Self::Output>) -> Result<Self::Output, CompileError> {
        Ok(join_terms(terms, " AND ", false))
    }

    fn visit_or(&mut self, terms: Vec<Self::Output>) -> Result<Self::Output, CompileError> {
        Ok(join_terms(terms, " OR ", true))
    }

    fn visit_not(&mut self, inner: Self::Output) -> Result<Self::Output, CompileError> {
        Ok(Compiled {
            sql: format!("NOT ({})", inner.sql),
            args: inner.args,
            leaves: 1,
        })
    }
}

fn join_terms<A>(terms: Vec<Compiled<A>>, separator: &str, group: bool) -> Compiled<A> {
    if terms.is_empty() {
        return Compiled {
            sql: "true".into(),
            args: Vec::new(),
            leaves: 1,
        };
    }
    let leaves: usize = terms.iter().map(|t| t.leaves).sum();
    let mut parts = Vec::with_capacity(terms.len());
    let mut args = Vec::new();
    for t in terms {
        parts.push(t.sql);
        args.extend(t.args);
    }
    let sql = parts.join(separator);
    Compiled {
        sql: if group && leaves > 1 { format!("({})", sql) } else { sql },
        args,
        leaves,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::thing_schema;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    /// Binds literals directly and answers inputs from a fixed list.
    #[derive(Default)]
    struct Bound {
        inputs: Vec<(&'static str, SqlValue)>,
    }

    impl ArgumentSource for Bound {
        type Arg = SqlValue;

        fn literal(&mut self, value: SqlValue) -> Result<SqlValue, CompileError> {
            Ok(value)
        }

        fn context(&mut self, descriptor: ValueDescriptor) -> Result<SqlValue, CompileError> {
            Ok(SqlValue::Text(format!("{:?}", descriptor)))
        }

        fn input(&mut self, name: &str) -> Result<SqlValue, CompileError> {
            self.inputs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| CompileError::UnresolvableIdentifier(name.to_string()))
        }

        fn is_array(&self, arg: &SqlValue) -> bool {
            arg.is_array()
        }
    }

    fn compile(cond: &Condition) -> Result<(Fragment, Vec<Join>), CompileError> {
        let schema = thing_schema();
        let thing = schema.model("Thing").unwrap();
        let mut source = Bound {
            inputs: vec![("ids", SqlValue::Array(vec![SqlValue::from("a")])), ("code", SqlValue::from("x"))],
        };
        let mut compiler = ConditionCompiler::for_query(&schema, thing, &mut source);
        let fragment = compiler.compile(cond)?;
        let joins = compiler.joins().to_vec();
        Ok((fragment, joins))
    }

    fn eq(lhs: &str, rhs: Operand) -> Condition {
        Condition::compare(Operand::ident(lhs), Operator::Equals, rhs)
    }

    #[test]
    fn single_leaf_is_bare() {
        let (f, _) = compile(&Condition::group(vec![vec![eq("thing.name", Operand::string("bob"))]])).unwrap();
        assert_eq!(f.sql, r#""thing"."name" IS NOT DISTINCT FROM ?"#);
        assert_eq!(f.args, vec![SqlValue::from("bob")]);
    }

    #[test]
    fn ungrouped_and_or_keeps_precedence() {
        // a and b or c and d
        let cond = Condition::group(vec![
            vec![eq("thing.first", Operand::string("a")), eq("thing.second", Operand::Number(1))],
            vec![eq("thing.first", Operand::string("c")), eq("thing.second", Operand::Number(2))],
        ]);
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(
            f.sql,
            r#"("thing"."first" IS NOT DISTINCT FROM ? AND "thing"."second" IS NOT DISTINCT FROM ? OR "thing"."first" IS NOT DISTINCT FROM ? AND "thing"."second" IS NOT DISTINCT FROM ?)"#
        );
        assert_eq!(f.args.len(), 4);
    }

    #[test]
    fn parenthesized_groups_get_their_own_parentheses() {
        // (a and b) or c
        let cond = Condition::group(vec![
            vec![Condition::group(vec![vec![
                eq("thing.first", Operand::string("a")),
                eq("thing.second", Operand::Number(1)),
            ]])],
            vec![eq("thing.isActive", Operand::Bool(true))],
        ]);
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(
            f.sql,
            r#"(("thing"."first" IS NOT DISTINCT FROM ? AND "thing"."second" IS NOT DISTINCT FROM ?) OR "thing"."is_active" IS NOT DISTINCT FROM ?)"#
        );
        assert_eq!(f.args[2], SqlValue::Bool(true));
    }

    #[rstest]
    #[case::not_equals(Operator::NotEquals, "IS DISTINCT FROM")]
    #[case::less_than(Operator::LessThan, "<")]
    #[case::less_or_equal(Operator::LessThanOrEquals, "<=")]
    #[case::greater_than(Operator::GreaterThan, ">")]
    #[case::greater_or_equal(Operator::GreaterThanOrEquals, ">=")]
    fn operators_map_to_sql(#[case] op: Operator, #[case] sql_op: &str) {
        let cond = Condition::compare(Operand::ident("thing.views"), op, Operand::Number(10));
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(f.sql, format!(r#""thing"."views" {} ?"#, sql_op));
    }

    #[test]
    fn literal_arrays_expand_per_element() {
        let cond = Condition::compare(
            Operand::ident("thing.name"),
            Operator::NotIn,
            Operand::Array(vec![Operand::string("a"), Operand::string("b")]),
        );
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(f.sql, r#""thing"."name" NOT IN (?, ?)"#);
        assert_eq!(f.args, vec![SqlValue::from("a"), SqlValue::from("b")]);
    }

    #[test]
    fn empty_literal_array_is_constant() {
        let cond = Condition::compare(Operand::ident("thing.name"), Operator::In, Operand::Array(vec![]));
        assert_eq!(compile(&cond).unwrap().0.sql, "false");
    }

    #[test]
    fn array_inputs_bind_once_with_any() {
        let cond = Condition::compare(Operand::ident("thing.id"), Operator::In, Operand::ident("ids"));
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(f.sql, r#""thing"."id" = ANY(?)"#);
    }

    #[test]
    fn to_many_membership_joins_and_compares() {
        let cond = Condition::compare(
            Operand::string("x"),
            Operator::In,
            Operand::ident("thing.repeatedThings.name"),
        );
        let (f, joins) = compile(&cond).unwrap();
        assert_eq!(f.sql, r#"? IS NOT DISTINCT FROM "thing$repeated_things"."name""#);
        assert_eq!(
            joins[0].sql(),
            r#"INNER JOIN "repeated_thing" AS "thing$repeated_things" ON "thing$repeated_things"."thing_id" = "thing"."id""#
        );
    }

    #[test]
    fn joins_are_deduplicated_across_leaves() {
        let cond = Condition::group(vec![vec![
            eq("thing.parent.name", Operand::string("a")),
            eq("thing.parent.isActive", Operand::Bool(true)),
        ]]);
        let (_, joins) = compile(&cond).unwrap();
        assert_eq!(joins.len(), 1);
    }

    #[test]
    fn enum_values_and_inputs_are_placeholders() {
        let cond = Condition::group(vec![vec![
            eq("thing.category", Operand::ident("Category.Sport")),
            eq("thing.code", Operand::ident("code")),
        ]]);
        let (f, _) = compile(&cond).unwrap();
        assert_eq!(f.args, vec![SqlValue::from("Sport"), SqlValue::from("x")]);
        assert!(compile(&eq("thing.category", Operand::ident("Category.Nope"))).is_err());
    }

    #[test]
    fn context_is_authenticated_is_cast() {
        let (f, _) = compile(&Condition::value(Operand::ident("ctx.isAuthenticated"))).unwrap();
        assert_eq!(f.sql, "?::boolean");
    }

    #[test]
    fn not_wraps_inner() {
        let (f, _) = compile(&Condition::negate(eq("thing.name", Operand::Null))).unwrap();
        assert_eq!(f.sql, r#"NOT ("thing"."name" IS NOT DISTINCT FROM ?)"#);
    }

    #[rstest]
    #[case::unknown_field(eq("thing.nope", Operand::Null))]
    #[case::unknown_root(eq("other.name", Operand::Null))]
    #[case::array_on_left(Condition::compare(Operand::Array(vec![]), Operator::Equals, Operand::Null))]
    #[case::in_scalar(Condition::compare(Operand::ident("thing.name"), Operator::In, Operand::string("a")))]
    #[case::assign(Condition::compare(Operand::ident("thing.name"), Operator::Assign, Operand::string("a")))]
    fn invalid_conditions_fail_to_compile(#[case] cond: Condition) {
        assert!(compile(&cond).is_err());
    }
}
