//! Capture the values a create or update writes: implicit write inputs first, in field
//! declaration order, then `@set` assignments on top.

use crate::error::{ActionError, CompileError};
use crate::expr::ValueSource;
use crate::schema::{Action, ActionType, FieldType, InputBehaviour, InputMode, Model, Relationship, Schema};
use crate::service::args::{typed_value, RequestArgs, RequestValues};
use crate::sql::{SqlValue, WriteValues};
use serde_json::{Map, Value};
use std::collections::HashSet;

struct Capture<'a> {
    schema: &'a Schema,
    action: &'a Action,
    /// Dotted targets of implicit write inputs.
    allowed: HashSet<String>,
}

impl<'a> Capture<'a> {
    fn allows(&self, path: &[String]) -> bool {
        self.allowed.contains(&path.join("."))
    }

    fn tree(&self, model: &Model, values: &Map<String, Value>, prefix: &[String], out: &mut WriteValues) -> Result<(), ActionError> {
        for (key, _) in values {
            if model.field(key).is_none() && (!prefix.is_empty() || self.action.explicit_input(key).is_none()) {
                return Err(ActionError::Validation(format!("unknown input: {}", join(prefix, key))));
            }
        }
        for field in &model.fields {
            let Some(value) = values.get(&field.name) else {
                continue;
            };
            let mut path = prefix.to_vec();
            path.push(field.name.clone());
            match field.relationship() {
                None => {
                    if !self.allows(&path) {
                        return Err(ActionError::Validation(format!("{} cannot be written", path.join("."))));
                    }
                    out.set(field.column(), typed_value(self.schema, &field.field_type, value, &path.join("."))?);
                }
                Some(Relationship::BelongsTo) => {
                    let related = self.schema.model(field.related_model().unwrap_or_default())?;
                    let fk = self.schema.foreign_key_column(model, field)?;
                    let nested = match value {
                        Value::Object(nested) => nested,
                        Value::Null if field.optional => {
                            out.set(fk, SqlValue::Null);
                            continue;
                        }
                        _ => return Err(ActionError::Validation(format!("{} must be an object", path.join(".")))),
                    };
                    let pk_name = related.primary_key().map(|f| f.name.as_str()).unwrap_or("id");
                    if nested.len() == 1 && nested.contains_key(pk_name) {
                        let mut key_path = path.clone();
                        key_path.push(pk_name.to_string());
                        if !self.allows(&key_path) {
                            return Err(ActionError::Validation(format!("{} cannot be written", key_path.join("."))));
                        }
                        let id = typed_value(self.schema, &FieldType::Id, &nested[pk_name], &key_path.join("."))?;
                        out.set(fk, id);
                        continue;
                    }
                    self.require_create(&path)?;
                    let mut child = WriteValues::new(related);
                    self.tree(related, nested, &path, &mut child)?;
                    out.nest_belongs_to(fk, child);
                }
                Some(_) => {
                    self.require_create(&path)?;
                    let related = self.schema.model(field.related_model().unwrap_or_default())?;
                    let fk = self.schema.foreign_key_column(model, field)?;
                    let items: Vec<&Value> = match value {
                        Value::Array(items) if field.repeated => items.iter().collect(),
                        Value::Object(_) if !field.repeated => vec![value],
                        _ => {
                            return Err(ActionError::Validation(format!(
                                "{} must be {}",
                                path.join("."),
                                if field.repeated { "a list" } else { "an object" }
                            )))
                        }
                    };
                    for item in items {
                        let item = item.as_object().ok_or_else(|| {
                            ActionError::Validation(format!("{} entries must be objects", path.join(".")))
                        })?;
                        let mut child = WriteValues::new(related);
                        self.tree(related, item, &path, &mut child)?;
                        out.push_has_many(fk.clone(), child);
                    }
                }
            }
        }
        Ok(())
    }

    fn require_create(&self, path: &[String]) -> Result<(), ActionError> {
        if self.action.action_type == ActionType::Create {
            Ok(())
        } else {
            Err(ActionError::Validation(format!(
                "{}: nested writes are only supported on create",
                path.join(".")
            )))
        }
    }
}

fn join(prefix: &[String], key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix.join("."), key)
    }
}

/// Required write inputs must be present, except beneath a list of nested rows where each
/// row is checked by shape instead.
fn check_required(action: &Action, values: &Map<String, Value>) -> Result<(), ActionError> {
    let required = action.inputs.iter().filter(|i| {
        i.behaviour == InputBehaviour::Implicit && i.mode == InputMode::Write && !i.optional
    });
    'inputs: for input in required {
        let mut current = values;
        for (i, segment) in input.target.iter().enumerate() {
            match current.get(segment) {
                Some(Value::Object(next)) if i + 1 < input.target.len() => current = next,
                Some(Value::Array(_)) => continue 'inputs,
                Some(_) if i + 1 == input.target.len() => continue 'inputs,
                _ => {
                    return Err(ActionError::Validation(format!(
                        "missing required input: {}",
                        input.name
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Build the write tree for a create or update, then apply every `@set` assignment.
pub fn capture_writes(
    schema: &Schema,
    model: &Model,
    action: &Action,
    args: &RequestArgs,
    values: &RequestValues<'_>,
) -> Result<WriteValues, ActionError> {
    let allowed = action
        .inputs
        .iter()
        .filter(|i| i.behaviour == InputBehaviour::Implicit && i.mode == InputMode::Write)
        .map(|i| i.target.join("."))
        .collect();
    let capture = Capture {
        schema,
        action,
        allowed,
    };
    check_required(action, &args.values)?;
    let mut tree = WriteValues::new(model);
    capture.tree(model, &args.values, &[], &mut tree)?;

    let root = model.expression_root();
    for assignment in &action.set_expressions {
        let Some((first, path)) = assignment.lhs.split_first() else {
            return Err(CompileError::InvalidAssignment("empty assignment target".into()).into());
        };
        if *first != root || path.is_empty() {
            return Err(CompileError::InvalidAssignment(format!(
                "{} must start with {}",
                assignment.lhs.join("."),
                root
            ))
            .into());
        }
        let value = values.value_of(&assignment.rhs)?;
        assign(schema, model, path, value, &mut tree)?;
    }
    Ok(tree)
}

fn assign(schema: &Schema, model: &Model, path: &[String], value: SqlValue, tree: &mut WriteValues) -> Result<(), CompileError> {
    let field = model.field_or_err(&path[0])?;
    match (field.relationship(), path.len()) {
        (None, 1) => {
            tree.set(field.column(), value);
            Ok(())
        }
        // post.author = ctx.identity
        (Some(Relationship::BelongsTo), 1) => {
            tree.set(schema.foreign_key_column(model, field)?, value);
            Ok(())
        }
        (Some(Relationship::BelongsTo), _) => {
            let related = schema.model(field.related_model().unwrap_or_default())?;
            let fk = schema.foreign_key_column(model, field)?;
            let is_key = path.len() == 2 && related.primary_key().map(|pk| pk.name == path[1]).unwrap_or(false);
            if is_key {
                tree.set(fk, value);
                return Ok(());
            }
            match tree.nested_mut(&fk) {
                Some(nested) => assign(schema, related, &path[1..], value, nested),
                None => Err(CompileError::InvalidAssignment(format!(
                    "{} is not being created by this request",
                    field.name
                ))),
            }
        }
        _ => Err(CompileError::InvalidAssignment(format!(
            "cannot assign through {}.{}",
            model.name, field.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Identity, RequestContext};
    use crate::expr::{Assignment, Operand};
    use crate::settings::RuntimeConfig;
    use crate::sql::QueryBuilder;
    use crate::test_support::{shop_schema, thing_schema};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn capture(schema: &Schema, action: &Action, input: Value, ctx: &RequestContext) -> Result<WriteValues, ActionError> {
        let model = schema.find_action(&action.name).map(|(m, _)| m).unwrap_or_else(|| schema.model("Thing").unwrap());
        let config = RuntimeConfig::default();
        let args = RequestArgs::from_input(action.action_type, &input)?;
        let values = RequestValues::new(schema, action, ctx, &config, &args)?;
        capture_writes(schema, model, action, &args, &values)
    }

    fn action(schema: &Schema, name: &str) -> Action {
        schema.find_action(name).unwrap().1.clone()
    }

    #[test]
    fn scalar_inputs_become_columns() {
        let schema = thing_schema();
        let tree = capture(
            &schema,
            &action(&schema, "createThing"),
            json!({"name": "t", "views": 2, "category": "Sport"}),
            &RequestContext::anonymous(),
        )
        .unwrap();
        assert_eq!(tree.get("name"), Some(&SqlValue::from("t")));
        assert_eq!(tree.get("views"), Some(&SqlValue::Int(2)));
        assert_eq!(tree.get("category"), Some(&SqlValue::from("Sport")));
    }

    #[test]
    fn relationship_id_sets_the_foreign_key() {
        let schema = thing_schema();
        let tree = capture(
            &schema,
            &action(&schema, "createThing"),
            json!({"name": "t", "parent": {"id": "p1"}}),
            &RequestContext::anonymous(),
        )
        .unwrap();
        assert_eq!(tree.get("parent_id"), Some(&SqlValue::from("p1")));
        assert!(!tree.has_nested());
    }

    #[test]
    fn relationship_fields_nest_a_create() {
        let schema = thing_schema();
        let tree = capture(
            &schema,
            &action(&schema, "createThing"),
            json!({"name": "t", "parent": {"name": "p"}}),
            &RequestContext::anonymous(),
        )
        .unwrap();
        let mut q = QueryBuilder::new(schema.model("Thing").unwrap());
        q.set_write_values(tree);
        assert_eq!(
            q.to_insert().template(),
            concat!(
                r#"WITH new_1_parent AS (INSERT INTO "parent" ("name") VALUES (?) RETURNING *), "#,
                r#"new_1_thing AS (INSERT INTO "thing" ("name", "parent_id") VALUES (?, (SELECT id FROM new_1_parent)) RETURNING *) "#,
                "SELECT * FROM new_1_thing"
            )
        );
    }

    #[test]
    fn has_many_lists_create_children() {
        let schema = shop_schema();
        let tree = capture(
            &schema,
            &action(&schema, "createOrder"),
            json!({"items": [
                {"quantity": 2, "product": {"name": "pencil"}},
                {"quantity": 1, "product": {"name": "pen"}}
            ]}),
            &RequestContext::anonymous(),
        )
        .unwrap();
        let mut q = QueryBuilder::new(schema.model("Order").unwrap());
        q.set_write_values(tree);
        let stmt = q.to_insert();
        assert!(stmt.template().starts_with(
            r#"WITH new_1_order AS (INSERT INTO "order" DEFAULT VALUES RETURNING *), new_1_product AS"#
        ));
        assert_eq!(
            stmt.args(),
            &[SqlValue::from("pencil"), SqlValue::Int(2), SqlValue::from("pen"), SqlValue::Int(1)]
        );
    }

    #[test]
    fn undeclared_and_missing_inputs_are_rejected() {
        let schema = thing_schema();
        let create = action(&schema, "createThing");
        let anon = RequestContext::anonymous();
        assert!(matches!(
            capture(&schema, &create, json!({"name": "t", "code": "x"}), &anon),
            Err(ActionError::Validation(_))
        ));
        assert!(matches!(
            capture(&schema, &create, json!({"name": "t", "bogus": 1}), &anon),
            Err(ActionError::Validation(_))
        ));
        assert!(matches!(
            capture(&schema, &create, json!({"views": 1}), &anon),
            Err(ActionError::Validation(_))
        ));
    }

    #[test]
    fn updates_reject_nested_writes() {
        let schema = thing_schema();
        let mut update = action(&schema, "updateThing");
        update.inputs.push(serde_json::from_value(json!(
            {"name": "parentName", "target": ["parent", "name"], "behaviour": "implicit", "mode": "write"}
        )).unwrap());
        let err = capture(
            &schema,
            &update,
            json!({"where": {"id": "t1"}, "values": {"parent": {"name": "p"}}}),
            &RequestContext::anonymous(),
        )
        .unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
    }

    #[test]
    fn set_expressions_apply_after_inputs() {
        let schema = thing_schema();
        let mut create = action(&schema, "createThing");
        create.set_expressions = vec![
            Assignment::new("thing.name", Operand::string("fixed")),
            Assignment::new("thing.parent", Operand::ident("ctx.identity")),
        ];
        let ctx = RequestContext::authenticated(Identity { id: "u1".into(), email: None });
        let tree = capture(&schema, &create, json!({"name": "t"}), &ctx).unwrap();
        assert_eq!(tree.get("name"), Some(&SqlValue::from("fixed")));
        assert_eq!(tree.get("parent_id"), Some(&SqlValue::from("u1")));
    }

    #[test]
    fn set_expressions_reach_into_nested_creates() {
        let schema = thing_schema();
        let mut create = action(&schema, "createThing");
        create.set_expressions = vec![Assignment::new("thing.parent.isActive", Operand::Bool(true))];
        let tree = capture(&schema, &create, json!({"name": "t", "parent": {"name": "p"}}), &RequestContext::anonymous())
            .unwrap();
        let mut q = QueryBuilder::new(schema.model("Thing").unwrap());
        q.set_write_values(tree);
        assert!(q
            .to_insert()
            .template()
            .starts_with(r#"WITH new_1_parent AS (INSERT INTO "parent" ("is_active", "name") VALUES (?, ?)"#));

        create.set_expressions = vec![Assignment::new("thing.parent.isActive", Operand::Bool(true))];
        let err = capture(&schema, &create, json!({"name": "t"}), &RequestContext::anonymous()).unwrap_err();
        assert!(matches!(err, ActionError::Compile(CompileError::InvalidAssignment(_))));
    }

    #[test]
    fn set_targets_must_start_at_the_model() {
        let schema = thing_schema();
        let mut create = action(&schema, "createThing");
        create.set_expressions = vec![Assignment::new("post.name", Operand::string("x"))];
        let err = capture(&schema, &create, json!({"name": "t"}), &RequestContext::anonymous()).unwrap_err();
        assert!(matches!(err, ActionError::Compile(CompileError::InvalidAssignment(_))));
    }
}
