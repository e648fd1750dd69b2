//! Load an action's embeds: related records fetched after the main query and attached to
//! each result under the relationship's field name. Paths nest, so `["author", "posts"]`
//! loads every embedded author's posts too.

use crate::context::RequestContext;
use crate::error::{ActionError, CompileError};
use crate::record::{FieldValue, Record};
use crate::schema::{Field, Model, Relationship, Schema, SortDirection};
use crate::service::executor::{guarded, Executor};
use crate::sql::{QueryBuilder, QueryOperand, SqlValue, Statement};
use std::future::Future;
use std::pin::Pin;

/// Embed paths merged on their shared prefixes, in declaration order.
#[derive(Debug, Default, PartialEq)]
pub struct EmbedTree(Vec<(String, EmbedTree)>);

impl EmbedTree {
    pub fn from_paths(paths: &[Vec<String>]) -> Self {
        let mut tree = EmbedTree::default();
        for path in paths {
            tree.insert(path);
        }
        tree
    }

    fn insert(&mut self, path: &[String]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        let i = match self.0.iter().position(|(name, _)| name == first) {
            Some(i) => i,
            None => {
                self.0.push((first.clone(), EmbedTree::default()));
                self.0.len() - 1
            }
        };
        self.0[i].1.insert(rest);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Related rows of `record` across `field`; `None` when the joining key is null.
fn lookup(schema: &Schema, model: &Model, field: &Field, related: &Model, record: &Record) -> Result<Option<Statement>, CompileError> {
    let (column, key) = match field.relationship() {
        Some(Relationship::BelongsTo) => {
            let fk = field.foreign_key_field_name.as_deref().unwrap_or_default();
            (related.primary_key_column(), record.get(fk))
        }
        Some(_) => {
            let pk = model.primary_key().map(|f| f.name.as_str()).unwrap_or("id");
            (schema.foreign_key_column(model, field)?, record.get(pk))
        }
        None => {
            return Err(CompileError::TypeMismatch(format!(
                "{}.{} is not a relationship",
                model.name, field.name
            )))
        }
    };
    let key = match key.map(FieldValue::to_sql) {
        None | Some(SqlValue::Null) => return Ok(None),
        Some(key) => key,
    };
    let mut query = QueryBuilder::new(related);
    query.select_all();
    query.filter(QueryOperand::column(related.table(), column).compare("IS NOT DISTINCT FROM", &QueryOperand::Value(key)));
    if field.repeated {
        query.order_by(query.primary_key(), SortDirection::Asc);
    }
    Ok(Some(query.to_select()))
}

type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'a>>;

/// Attach every embed in `tree` to each of `records`, instances of `model`. One query per
/// record and relationship.
pub fn resolve_embeds<'a, E: Executor + ?Sized>(
    executor: &'a mut E,
    ctx: &'a RequestContext,
    schema: &'a Schema,
    model: &'a Model,
    tree: &'a EmbedTree,
    records: &'a mut [Record],
) -> EmbedFuture<'a> {
    Box::pin(async move {
        for (name, children) in &tree.0 {
            let field = model.field_or_err(name)?;
            let related = schema.model(field.related_model().unwrap_or_default())?;
            for record in records.iter_mut() {
                let mut embedded: Vec<Record> = match lookup(schema, model, field, related, record)? {
                    Some(statement) => guarded(ctx, executor.execute_query(&statement))
                        .await?
                        .into_iter()
                        .map(|row| Record::from_row(related, row))
                        .collect(),
                    None => Vec::new(),
                };
                if !children.is_empty() && !embedded.is_empty() {
                    resolve_embeds(&mut *executor, ctx, schema, related, children, &mut embedded).await?;
                }
                let value = if field.repeated {
                    FieldValue::EmbeddedList(embedded)
                } else {
                    embedded
                        .into_iter()
                        .next()
                        .map(FieldValue::Embedded)
                        .unwrap_or(FieldValue::Null)
                };
                record.insert(name.clone(), value);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{row, thing_schema, Call, ScriptedExecutor};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn paths(list: &[&str]) -> Vec<Vec<String>> {
        list.iter()
            .map(|p| p.split('.').map(str::to_string).collect())
            .collect()
    }

    fn thing(value: serde_json::Value) -> Record {
        let schema = thing_schema();
        Record::from_row(schema.model("Thing").unwrap(), row(value))
    }

    async fn embed(paths_: &[&str], executor: &mut ScriptedExecutor, records: &mut [Record]) -> Result<(), ActionError> {
        let schema = thing_schema();
        let tree = EmbedTree::from_paths(&paths(paths_));
        let ctx = RequestContext::anonymous();
        resolve_embeds(executor, &ctx, &schema, schema.model("Thing").unwrap(), &tree, records).await
    }

    #[test]
    fn shared_prefixes_merge() {
        let tree = EmbedTree::from_paths(&paths(&["parent", "repeatedThings.thing", "repeatedThings"]));
        assert_eq!(tree.0.len(), 2);
        assert_eq!(tree.0[1].0, "repeatedThings");
        assert_eq!(tree.0[1].1 .0[0].0, "thing");
    }

    #[tokio::test]
    async fn belongs_to_is_fetched_by_foreign_key() {
        let mut executor = ScriptedExecutor::default().returning(vec![row(json!({"id": "p1", "name": "pat"}))]);
        let mut records = vec![thing(json!({"id": "t1", "parent_id": "p1"}))];
        embed(&["parent"], &mut executor, &mut records).await.unwrap();
        assert_eq!(
            executor.calls,
            vec![Call::Query(Statement::new(
                r#"SELECT "parent".* FROM "parent" WHERE "parent"."id" IS NOT DISTINCT FROM ?"#,
                vec![SqlValue::from("p1")]
            ))]
        );
        let Some(FieldValue::Embedded(parent)) = records[0].get("parent") else {
            panic!("parent was not embedded");
        };
        assert_eq!(parent.get("name"), Some(&FieldValue::Text("pat".into())));
    }

    #[tokio::test]
    async fn null_foreign_key_embeds_null_without_a_query() {
        let mut executor = ScriptedExecutor::default();
        let mut records = vec![thing(json!({"id": "t1", "parent_id": null}))];
        embed(&["parent"], &mut executor, &mut records).await.unwrap();
        assert!(executor.calls.is_empty());
        assert_eq!(records[0].get("parent"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn has_many_is_fetched_by_the_inverse_key_in_order() {
        let mut executor = ScriptedExecutor::default()
            .returning(vec![row(json!({"id": "r1", "thing_id": "t1"})), row(json!({"id": "r2", "thing_id": "t1"}))])
            .returning(vec![]);
        let mut records = vec![thing(json!({"id": "t1"})), thing(json!({"id": "t2"}))];
        embed(&["repeatedThings"], &mut executor, &mut records).await.unwrap();
        let queries = executor.queries();
        assert_eq!(
            queries[0].template(),
            r#"SELECT "repeated_thing".* FROM "repeated_thing" WHERE "repeated_thing"."thing_id" IS NOT DISTINCT FROM ? ORDER BY "repeated_thing"."id" ASC"#
        );
        assert_eq!(queries[1].args(), &[SqlValue::from("t2")]);
        assert!(matches!(records[0].get("repeatedThings"), Some(FieldValue::EmbeddedList(items)) if items.len() == 2));
        assert_eq!(records[1].get("repeatedThings"), Some(&FieldValue::EmbeddedList(vec![])));
    }

    #[tokio::test]
    async fn has_one_takes_the_first_row_or_null() {
        let mut executor = ScriptedExecutor::default()
            .returning(vec![row(json!({"id": "pr1", "bio": "hi", "thing_id": "t1"}))])
            .returning(vec![]);
        let mut records = vec![thing(json!({"id": "t1"})), thing(json!({"id": "t2"}))];
        embed(&["profile"], &mut executor, &mut records).await.unwrap();
        assert_eq!(
            executor.queries()[0].template(),
            r#"SELECT "profile".* FROM "profile" WHERE "profile"."thing_id" IS NOT DISTINCT FROM ?"#
        );
        assert!(matches!(records[0].get("profile"), Some(FieldValue::Embedded(p)) if p.get("bio") == Some(&FieldValue::Text("hi".into()))));
        assert_eq!(records[1].get("profile"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn nested_paths_recurse_into_embedded_records() {
        let mut executor = ScriptedExecutor::default()
            .returning(vec![row(json!({"id": "r1", "thing_id": "t1"}))])
            .returning(vec![row(json!({"id": "t1", "name": "back"}))]);
        let mut records = vec![thing(json!({"id": "t1"}))];
        embed(&["repeatedThings.thing"], &mut executor, &mut records).await.unwrap();
        let queries = executor.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[1].template().starts_with(r#"SELECT "thing".* FROM "thing" WHERE "thing"."id""#));
        let Some(FieldValue::EmbeddedList(items)) = records[0].get("repeatedThings") else {
            panic!("repeatedThings was not embedded");
        };
        assert!(matches!(items[0].get("thing"), Some(FieldValue::Embedded(_))));
    }
}
