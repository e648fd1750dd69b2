//! Two-phase authorization. Rules that only read request values are evaluated before any
//! database work; the rest are compiled into a permission query and run against the ids
//! the action touches.

use crate::context::RequestContext;
use crate::error::ActionError;
use crate::expr::{is_statically_decidable, Evaluator};
use crate::record::Row;
use crate::schema::{Action, Model, Schema};
use crate::service::args::RequestValues;
use crate::service::executor::{guarded, Executor};
use crate::settings::RuntimeConfig;
use crate::sql::{applicable_rules, compile_permissions, PermissionQuery, SqlValue};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum Authorization {
    Granted,
    Denied,
    /// Decided per row once the affected ids are known.
    Deferred(PermissionQuery),
}

/// No applicable rule denies. One statically true rule grants. When every rule is static
/// and false the request is denied without touching the database.
pub fn authorize_early(
    schema: &Schema,
    model: &Model,
    action: &Action,
    values: &RequestValues<'_>,
) -> Result<Authorization, ActionError> {
    let rules = applicable_rules(model, action);
    if rules.is_empty() {
        debug!(action = %action.name, "no permission rules apply");
        return Ok(Authorization::Denied);
    }
    let mut all_static = true;
    for rule in rules {
        let Some(expression) = &rule.expression else {
            continue;
        };
        if !is_statically_decidable(expression, schema) {
            all_static = false;
            continue;
        }
        if Evaluator::new(values).evaluate(expression)? {
            return Ok(Authorization::Granted);
        }
    }
    if all_static {
        return Ok(Authorization::Denied);
    }
    Ok(compile_permissions(schema, model, action)?
        .map(Authorization::Deferred)
        .unwrap_or(Authorization::Denied))
}

/// Primary key of `row` as a bindable value.
pub fn row_key(row: &Row, pk_column: &str) -> Option<SqlValue> {
    match row.get(pk_column)? {
        Value::Null => None,
        v => Some(SqlValue::from_json(v)),
    }
}

/// Every id must come back with a true `result`; a missing row counts as denied.
pub async fn authorize_rows<E: Executor + ?Sized>(
    executor: &mut E,
    ctx: &RequestContext,
    config: &RuntimeConfig,
    query: &PermissionQuery,
    ids: &[SqlValue],
) -> Result<(), ActionError> {
    let mut unique: Vec<SqlValue> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }
    if unique.is_empty() {
        return Ok(());
    }
    let statement = query.bind(ctx, config, &unique)?;
    let rows = guarded(ctx, executor.execute_query(&statement)).await?;
    let granted: Vec<SqlValue> = rows
        .iter()
        .filter(|row| row.get("result").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|row| row_key(row, query.key_column()))
        .collect();
    let denied: Vec<&SqlValue> = unique.iter().filter(|id| !granted.contains(id)).collect();
    if denied.is_empty() {
        return Ok(());
    }
    warn!(requested = unique.len(), denied = denied.len(), "row permission check failed");
    Err(ActionError::PermissionDenied(format!(
        "{} of {} records are not accessible: {}",
        denied.len(),
        unique.len(),
        denied.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use crate::expr::{Condition, Operand, Operator};
    use crate::schema::PermissionRule;
    use crate::service::args::RequestArgs;
    use crate::test_support::{row, thing_schema, Call, ScriptedExecutor};
    use serde_json::json;

    fn decide(rules: Vec<Condition>, ctx: &RequestContext) -> Authorization {
        let schema = thing_schema();
        let (model, action) = schema.find_action("getThing").unwrap();
        let mut action = action.clone();
        action.permissions = rules
            .into_iter()
            .map(|e| PermissionRule { expression: Some(e), ..Default::default() })
            .collect();
        let config = RuntimeConfig::default();
        let args = RequestArgs::default();
        let values = RequestValues::new(&schema, &action, ctx, &config, &args).unwrap();
        authorize_early(&schema, model, &action, &values).unwrap()
    }

    fn authenticated() -> Condition {
        Condition::value(Operand::ident("ctx.isAuthenticated"))
    }

    fn owned() -> Condition {
        Condition::compare(Operand::ident("thing.parentId"), Operator::Equals, Operand::ident("ctx.identity"))
    }

    #[test]
    fn no_rules_deny() {
        assert_eq!(decide(vec![], &RequestContext::anonymous()), Authorization::Denied);
    }

    #[test]
    fn static_true_rule_grants() {
        let ctx = RequestContext::authenticated(Identity { id: "u1".into(), email: None });
        assert_eq!(decide(vec![authenticated(), owned()], &ctx), Authorization::Granted);
    }

    #[test]
    fn all_static_false_denies() {
        assert_eq!(decide(vec![authenticated()], &RequestContext::anonymous()), Authorization::Denied);
    }

    #[test]
    fn row_dependent_rules_defer() {
        let decision = decide(vec![authenticated(), owned()], &RequestContext::anonymous());
        let Authorization::Deferred(query) = decision else {
            panic!("expected a deferred decision");
        };
        assert!(query.sql().contains(r#""thing"."parent_id" IS NOT DISTINCT FROM ?"#));
    }

    fn permission_query() -> PermissionQuery {
        let schema = thing_schema();
        let (model, action) = schema.find_action("getThing").unwrap();
        let mut action = action.clone();
        action.permissions = vec![PermissionRule { expression: Some(owned()), ..Default::default() }];
        compile_permissions(&schema, model, &action).unwrap().unwrap()
    }

    #[tokio::test]
    async fn rows_pass_when_every_id_is_granted() {
        let mut executor = ScriptedExecutor::default().returning(vec![
            row(json!({"id": "a", "result": true})),
            row(json!({"id": "b", "result": true})),
        ]);
        let ctx = RequestContext::anonymous();
        let ids = [SqlValue::from("a"), SqlValue::from("b"), SqlValue::from("a")];
        authorize_rows(&mut executor, &ctx, &RuntimeConfig::default(), &permission_query(), &ids)
            .await
            .unwrap();
        let Call::Query(statement) = &executor.calls[0] else {
            panic!("expected a query");
        };
        assert_eq!(statement.args().len(), 3);
    }

    #[tokio::test]
    async fn a_single_false_row_denies() {
        let mut executor = ScriptedExecutor::default().returning(vec![
            row(json!({"id": "a", "result": true})),
            row(json!({"id": "b", "result": false})),
        ]);
        let ids = [SqlValue::from("a"), SqlValue::from("b")];
        let err = authorize_rows(
            &mut executor,
            &RequestContext::anonymous(),
            &RuntimeConfig::default(),
            &permission_query(),
            &ids,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ActionError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn duplicate_granted_rows_do_not_cover_other_ids() {
        let mut executor = ScriptedExecutor::default().returning(vec![
            row(json!({"id": "a", "result": true})),
            row(json!({"id": "a", "result": true})),
        ]);
        let ids = [SqlValue::from("a"), SqlValue::from("b")];
        let err = authorize_rows(
            &mut executor,
            &RequestContext::anonymous(),
            &RuntimeConfig::default(),
            &permission_query(),
            &ids,
        )
        .await
        .unwrap_err();
        let ActionError::PermissionDenied(message) = err else {
            panic!("expected a permission error");
        };
        assert!(message.ends_with("not accessible: b"), "{}", message);
    }

    #[tokio::test]
    async fn missing_rows_deny() {
        let mut executor = ScriptedExecutor::default().returning(vec![row(json!({"id": "a", "result": true}))]);
        let ids = [SqlValue::from("a"), SqlValue::from("b")];
        let result = authorize_rows(
            &mut executor,
            &RequestContext::anonymous(),
            &RuntimeConfig::default(),
            &permission_query(),
            &ids,
        )
        .await;
        assert!(matches!(result, Err(ActionError::PermissionDenied(_))));
    }
}
