//! Compile an action's permission rules into one query that authorizes a batch of rows.
//!
//! ```sql
//! SELECT "post"."id", (<rule 1>) OR (<rule 2>) AS "result"
//! FROM "post" LEFT JOIN ... WHERE "post"."id" IN (?) GROUP BY "post"."id", ...
//! ```
//!
//! Values are kept as [`ValueDescriptor`]s so the query can be compiled once per action
//! and bound per request.

use crate::context::{RequestContext, ValueDescriptor};
use crate::error::CompileError;
use crate::schema::{Action, Model, PermissionRule, Schema};
use crate::settings::RuntimeConfig;
use crate::sql::condition::{ArgumentSource, ConditionCompiler};
use crate::sql::{quoted, ColumnRef, SqlValue, Statement};

#[derive(Clone, Debug, PartialEq)]
pub struct PermissionQuery {
    sql: String,
    values: Vec<ValueDescriptor>,
    key_column: String,
}

/// Rules that govern `action`: its own rules plus model rules listing its type. Role-only
/// rules carry no expression and are skipped.
pub fn applicable_rules<'a>(model: &'a Model, action: &'a Action) -> Vec<&'a PermissionRule> {
    action
        .permissions
        .iter()
        .chain(
            model
                .permissions
                .iter()
                .filter(|r| r.actions.contains(&action.action_type)),
        )
        .filter(|r| r.expression.is_some())
        .collect()
}

struct Deferred;

impl ArgumentSource for Deferred {
    type Arg = ValueDescriptor;

    fn inline_constants(&self) -> bool {
        true
    }

    fn literal(&mut self, value: SqlValue) -> Result<ValueDescriptor, CompileError> {
        match value {
            SqlValue::Text(s) => Ok(ValueDescriptor::StringLiteral(s)),
            SqlValue::Int(n) => Ok(ValueDescriptor::NumberLiteral(n)),
            other => Err(CompileError::TypeMismatch(format!(
                "unsupported literal in permission rule: {:?}",
                other
            ))),
        }
    }

    fn context(&mut self, descriptor: ValueDescriptor) -> Result<ValueDescriptor, CompileError> {
        Ok(descriptor)
    }

    fn input(&mut self, name: &str) -> Result<ValueDescriptor, CompileError> {
        Err(CompileError::UnresolvableIdentifier(format!(
            "permission rules cannot reference inputs: {}",
            name
        )))
    }

    fn is_array(&self, _: &ValueDescriptor) -> bool {
        false
    }
}

/// Compile `rules` without building a query, so a bad rule fails when the schema loads
/// even if no action applies it.
pub fn check_rules(schema: &Schema, model: &Model, rules: &[PermissionRule]) -> Result<(), CompileError> {
    let mut source = Deferred;
    let mut compiler = ConditionCompiler::for_permissions(schema, model, &mut source);
    for expression in rules.iter().filter_map(|r| r.expression.as_ref()) {
        compiler.compile(expression)?;
    }
    Ok(())
}

/// `None` when no rule with an expression applies.
pub fn compile_permissions(
    schema: &Schema,
    model: &Model,
    action: &Action,
) -> Result<Option<PermissionQuery>, CompileError> {
    let rules = applicable_rules(model, action);
    if rules.is_empty() {
        return Ok(None);
    }

    let mut source = Deferred;
    let mut compiler = ConditionCompiler::for_permissions(schema, model, &mut source);
    let mut exprs = Vec::with_capacity(rules.len());
    let mut values = Vec::new();
    for rule in rules {
        let Some(expression) = &rule.expression else {
            continue;
        };
        let fragment = compiler.compile(expression)?;
        exprs.push(format!("({})", fragment.sql));
        values.extend(fragment.args);
    }

    let table = model.table();
    let key_column = model.primary_key_column();
    let pk = ColumnRef::new(table.clone(), key_column.clone());
    let mut sql = format!(
        "SELECT {}, {} AS {} FROM {}",
        pk,
        exprs.join(" OR "),
        quoted("result"),
        quoted(&table)
    );
    for join in compiler.joins() {
        sql.push(' ');
        sql.push_str(&join.sql());
    }
    sql.push_str(&format!(" WHERE {} IN (?) GROUP BY {}", pk, pk));
    for column in compiler.grouped_columns() {
        sql.push_str(&format!(", {}", column));
    }
    values.push(ValueDescriptor::RecordIds);

    Ok(Some(PermissionQuery {
        sql,
        values,
        key_column,
    }))
}

impl PermissionQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[ValueDescriptor] {
        &self.values
    }

    /// Column of the result rows holding each authorized record's key.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Resolve every descriptor for this request and expand the record-id placeholder to
    /// one placeholder per id.
    pub fn bind(
        &self,
        ctx: &RequestContext,
        config: &RuntimeConfig,
        ids: &[SqlValue],
    ) -> Result<Statement, CompileError> {
        if ids.is_empty() {
            return Err(CompileError::TypeMismatch("no record ids to authorize".into()));
        }
        let mut template = String::with_capacity(self.sql.len() + ids.len() * 3);
        let mut args = Vec::with_capacity(self.values.len() + ids.len());
        let mut values = self.values.iter();
        let mut in_quotes = false;
        for c in self.sql.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    template.push(c);
                }
                '?' if !in_quotes => {
                    let descriptor = values.next().ok_or_else(|| {
                        CompileError::TypeMismatch("more placeholders than values".into())
                    })?;
                    if *descriptor == ValueDescriptor::RecordIds {
                        template.push_str(&vec!["?"; ids.len()].join(", "));
                        args.extend(ids.iter().cloned());
                    } else {
                        template.push('?');
                        args.push(descriptor.resolve(ctx, config)?);
                    }
                }
                _ => template.push(c),
            }
        }
        Ok(Statement::new(template, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use crate::expr::{Condition, Operand, Operator};
    use crate::schema::ActionType;
    use crate::test_support::thing_schema;
    use pretty_assertions::assert_eq;

    fn action_with(rules: Vec<Condition>) -> Action {
        Action {
            name: "getThing".into(),
            action_type: ActionType::Get,
            inputs: vec![],
            permissions: rules
                .into_iter()
                .map(|e| PermissionRule { expression: Some(e), ..Default::default() })
                .collect(),
            where_expressions: vec![],
            set_expressions: vec![],
            order_by: vec![],
            sortable: vec![],
            embeds: vec![],
        }
    }

    fn compile(rules: Vec<Condition>) -> Result<Option<PermissionQuery>, CompileError> {
        let schema = thing_schema();
        let model = schema.model("Thing").unwrap().clone();
        compile_permissions(&schema, &model, &action_with(rules))
    }

    #[test]
    fn no_rules_compile_to_nothing() {
        assert_eq!(compile(vec![]).unwrap(), None);
    }

    #[test]
    fn rules_are_ored_with_left_joins_and_grouping() {
        let q = compile(vec![
            Condition::compare(Operand::ident("thing.parent.name"), Operator::Equals, Operand::string("bob")),
            Condition::compare(Operand::ident("thing.isActive"), Operator::Equals, Operand::Bool(true)),
        ])
        .unwrap()
        .unwrap();
        assert_eq!(
            q.sql(),
            concat!(
                r#"SELECT "thing"."id", ("thing$parent"."name" IS NOT DISTINCT FROM ?) OR ("thing"."is_active" IS NOT DISTINCT FROM true) AS "result" "#,
                r#"FROM "thing" LEFT JOIN "parent" AS "thing$parent" ON "thing"."parent_id" = "thing$parent"."id" "#,
                r#"WHERE "thing"."id" IN (?) GROUP BY "thing"."id", "thing$parent"."name""#
            )
        );
        assert_eq!(
            q.values(),
            &[ValueDescriptor::StringLiteral("bob".into()), ValueDescriptor::RecordIds]
        );
    }

    #[test]
    fn to_many_fields_aggregate_on_the_right_of_in() {
        let q = compile(vec![Condition::compare(
            Operand::ident("ctx.identity.email"),
            Operator::In,
            Operand::ident("thing.repeatedThings.name"),
        )])
        .unwrap()
        .unwrap();
        assert!(q
            .sql()
            .contains(r#"(? = ANY(ARRAY_AGG("thing$repeated_things"."name"))) AS "result""#));
        assert_eq!(q.values()[0], ValueDescriptor::IdentityEmail);
    }

    #[test]
    fn to_many_fields_cannot_be_compared_directly() {
        let err = compile(vec![Condition::compare(
            Operand::ident("thing.repeatedThings.name"),
            Operator::Equals,
            Operand::string("x"),
        )])
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedArray(_)));
    }

    #[test]
    fn inputs_are_rejected() {
        let err = compile(vec![Condition::compare(
            Operand::ident("thing.name"),
            Operator::Equals,
            Operand::ident("name"),
        )])
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvableIdentifier(_)));
    }

    #[test]
    fn bind_expands_ids_and_resolves_context() {
        let q = compile(vec![
            Condition::value(Operand::ident("ctx.isAuthenticated")),
            Condition::compare(Operand::ident("thing.parentId"), Operator::Equals, Operand::ident("ctx.identity")),
        ])
        .unwrap()
        .unwrap();
        let ctx = RequestContext::authenticated(Identity { id: "u1".into(), email: None });
        let stmt = q
            .bind(&ctx, &RuntimeConfig::default(), &[SqlValue::from("a"), SqlValue::from("b")])
            .unwrap();
        assert!(stmt.template().contains(r#"WHERE "thing"."id" IN (?, ?) GROUP BY"#));
        assert_eq!(
            stmt.args(),
            &[SqlValue::Bool(true), SqlValue::from("u1"), SqlValue::from("a"), SqlValue::from("b")]
        );
        assert_eq!(stmt.placeholder_count(), stmt.args().len());
    }
}
