//! Schema validation: identifier safety, referential integrity and action consistency.
//!
//! Identifiers end up quoted inside generated SQL, so only plain ASCII identifiers are
//! accepted; nothing with a quote, a dot or a `?` can reach a statement template.

use crate::context::ValueDescriptor;
use crate::error::{CompileError, SchemaError};
use crate::expr::{Assignment, Comparison, Condition, ConditionVisitor, Operand, Operator};
use crate::schema::{Action, ActionType, FieldType, InputBehaviour, Model, Relationship, Schema};
use crate::sql::{check_rules, compile_permissions, ArgumentSource, ConditionCompiler, SqlValue};
use regex::Regex;
use std::collections::HashSet;
use std::convert::Infallible;

const IDENTIFIER_PATTERN: &str = "^[A-Za-z][A-Za-z0-9_]*$";

pub fn validate(schema: &Schema) -> Result<(), SchemaError> {
    let ident = Regex::new(IDENTIFIER_PATTERN)
        .map_err(|e| SchemaError::Validation(format!("identifier pattern: {}", e)))?;
    let check = |name: &str| -> Result<(), SchemaError> {
        if ident.is_match(name) {
            Ok(())
        } else {
            Err(SchemaError::InvalidIdentifier(name.to_string()))
        }
    };

    let mut enum_names = HashSet::new();
    for e in &schema.enums {
        check(&e.name)?;
        if !enum_names.insert(e.name.as_str()) {
            return Err(SchemaError::Duplicate { kind: "enum", name: e.name.clone() });
        }
        for v in &e.values {
            check(v)?;
        }
    }

    let mut model_names = HashSet::new();
    let mut action_names = HashSet::new();
    for m in &schema.models {
        check(&m.name)?;
        if !model_names.insert(m.name.as_str()) {
            return Err(SchemaError::Duplicate { kind: "model", name: m.name.clone() });
        }
        let mut field_names = HashSet::new();
        for f in &m.fields {
            check(&f.name)?;
            if !field_names.insert(f.name.as_str()) {
                return Err(SchemaError::Duplicate {
                    kind: "field",
                    name: format!("{}.{}", m.name, f.name),
                });
            }
        }
        for a in &m.actions {
            check(&a.name)?;
            if !action_names.insert(a.name.as_str()) {
                return Err(SchemaError::Duplicate { kind: "action", name: a.name.clone() });
            }
        }
    }

    for m in &schema.models {
        validate_primary_key(m)?;
        validate_fields(schema, m)?;
        validate_actions(schema, m)?;
    }
    // expressions resolve through relationships, so every model must be sound first
    for m in &schema.models {
        validate_expressions(schema, m)?;
    }
    Ok(())
}

fn validate_primary_key(model: &Model) -> Result<(), SchemaError> {
    let flagged = model.fields.iter().filter(|f| f.primary_key).count();
    let valid = match flagged {
        0 => model.field("id").map(|f| !f.is_relationship()).unwrap_or(false),
        1 => model.primary_key().map(|f| !f.is_relationship() && !f.repeated).unwrap_or(false),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidPrimaryKey { model: model.name.clone() })
    }
}

fn validate_fields(schema: &Schema, model: &Model) -> Result<(), SchemaError> {
    for f in &model.fields {
        match &f.field_type {
            FieldType::Enum(name) if schema.find_enum(name).is_none() => {
                return Err(SchemaError::MissingReference { kind: "enum", id: name.clone() });
            }
            FieldType::Model(name) if schema.find_model(name).is_none() => {
                return Err(SchemaError::MissingReference { kind: "model", id: name.clone() });
            }
            _ => {}
        }
        match f.relationship() {
            Some(Relationship::BelongsTo) => {
                let fk = f.foreign_key_field_name.as_deref().unwrap_or_default();
                if model.field(fk).is_none() {
                    return Err(SchemaError::MissingReference {
                        kind: "foreign key field",
                        id: format!("{}.{}", model.name, fk),
                    });
                }
            }
            Some(_) => {
                schema.inverse_field(model, f).map_err(|_| SchemaError::MissingReference {
                    kind: "inverse field",
                    id: format!("{}.{}", model.name, f.name),
                })?;
            }
            None => {}
        }
    }
    Ok(())
}

fn validate_actions(schema: &Schema, model: &Model) -> Result<(), SchemaError> {
    for action in &model.actions {
        validate_embeds(schema, model, action)?;
        for input in &action.inputs {
            match input.behaviour {
                InputBehaviour::Implicit => validate_target(schema, model, &input.target).map_err(|_| {
                    SchemaError::MissingReference {
                        kind: "input target",
                        id: format!("{}.{}", action.name, input.target.join(".")),
                    }
                })?,
                InputBehaviour::Explicit => {
                    if !input.target.is_empty() {
                        return Err(SchemaError::Validation(format!(
                            "explicit input {}.{} cannot have a target",
                            action.name, input.name
                        )));
                    }
                }
            }
        }
        let sort_fields = action
            .order_by
            .iter()
            .map(|o| o.field.as_str())
            .chain(action.sortable.iter().map(String::as_str));
        for name in sort_fields {
            if action.action_type != ActionType::List {
                return Err(SchemaError::Validation(format!(
                    "{}: ordering only applies to list actions",
                    action.name
                )));
            }
            match model.field(name) {
                Some(f) if !f.is_relationship() => {}
                _ => {
                    return Err(SchemaError::MissingReference {
                        kind: "sort field",
                        id: format!("{}.{}", model.name, name),
                    })
                }
            }
        }
    }
    Ok(())
}

fn validate_embeds(schema: &Schema, model: &Model, action: &Action) -> Result<(), SchemaError> {
    if action.embeds.is_empty() {
        return Ok(());
    }
    if !matches!(action.action_type, ActionType::Get | ActionType::List) {
        return Err(SchemaError::Validation(format!(
            "{}: embeds only apply to get and list actions",
            action.name
        )));
    }
    for path in &action.embeds {
        let missing = || SchemaError::MissingReference {
            kind: "embed",
            id: format!("{}.{}", action.name, path.join(".")),
        };
        if path.is_empty() {
            return Err(missing());
        }
        let mut current = model;
        for fragment in path {
            let related = current
                .field(fragment)
                .and_then(|f| f.related_model())
                .and_then(|name| schema.find_model(name))
                .ok_or_else(missing)?;
            current = related;
        }
    }
    Ok(())
}

fn validate_expressions(schema: &Schema, model: &Model) -> Result<(), SchemaError> {
    check_rules(schema, model, &model.permissions).map_err(|source| SchemaError::Expression {
        owner: model.name.clone(),
        source,
    })?;
    for action in &model.actions {
        let fail = |source: CompileError| SchemaError::Expression {
            owner: action.name.clone(),
            source,
        };
        compile_permissions(schema, model, action).map_err(fail)?;
        for condition in &action.where_expressions {
            let mut source = DeclaredInputs::new(action, condition);
            ConditionCompiler::for_query(schema, model, &mut source)
                .compile(condition)
                .map_err(fail)?;
        }
        for assignment in &action.set_expressions {
            check_assignment(schema, model, action, assignment).map_err(fail)?;
        }
    }
    Ok(())
}

/// Stands in for request values while a `@where` is compiled at load time. Literals and
/// context values always resolve; inputs only when the action declares them. The argument
/// records whether the value will be an array.
struct DeclaredInputs<'a> {
    action: &'a Action,
    membership: Vec<String>,
}

impl<'a> DeclaredInputs<'a> {
    fn new(action: &'a Action, condition: &Condition) -> Self {
        let membership = match condition.accept(&mut MembershipInputs) {
            Ok(names) => names,
            Err(never) => match never {},
        };
        DeclaredInputs { action, membership }
    }
}

impl ArgumentSource for DeclaredInputs<'_> {
    type Arg = bool;

    fn literal(&mut self, _: SqlValue) -> Result<bool, CompileError> {
        Ok(false)
    }

    fn context(&mut self, _: ValueDescriptor) -> Result<bool, CompileError> {
        Ok(false)
    }

    fn input(&mut self, name: &str) -> Result<bool, CompileError> {
        match self.action.explicit_input(name) {
            Some(_) => Ok(self.membership.iter().any(|m| m == name)),
            None => Err(CompileError::UnresolvableIdentifier(name.to_string())),
        }
    }

    fn is_array(&self, arg: &bool) -> bool {
        *arg
    }
}

/// Inputs used as the right side of `in` / `not in`; requests supply them as lists.
struct MembershipInputs;

impl ConditionVisitor for MembershipInputs {
    type Output = Vec<String>;
    type Error = Infallible;

    fn visit_leaf(&mut self, leaf: &Comparison) -> Result<Vec<String>, Infallible> {
        Ok(match (leaf.operator, &leaf.rhs) {
            (Some(Operator::In | Operator::NotIn), Some(Operand::Ident(path))) if path.len() == 1 => {
                vec![path[0].clone()]
            }
            _ => Vec::new(),
        })
    }

    fn visit_and(&mut self, terms: Vec<Vec<String>>) -> Result<Vec<String>, Infallible> {
        Ok(terms.concat())
    }

    fn visit_or(&mut self, terms: Vec<Vec<String>>) -> Result<Vec<String>, Infallible> {
        Ok(terms.concat())
    }

    fn visit_not(&mut self, inner: Vec<String>) -> Result<Vec<String>, Infallible> {
        Ok(inner)
    }
}

/// `@set` targets walk belongs-to relationships only and end on a field; the value must
/// be a literal, a context value, an enum value or a declared input.
fn check_assignment(
    schema: &Schema,
    model: &Model,
    action: &Action,
    assignment: &Assignment,
) -> Result<(), CompileError> {
    let root = model.expression_root();
    let path = match assignment.lhs.split_first() {
        Some((first, path)) if *first == root && !path.is_empty() => path,
        _ => {
            return Err(CompileError::InvalidAssignment(format!(
                "{} must start with {}",
                assignment.lhs.join("."),
                root
            )))
        }
    };
    let mut current = model;
    for (i, fragment) in path.iter().enumerate() {
        let field = current.field_or_err(fragment)?;
        let last = i + 1 == path.len();
        match field.relationship() {
            None if last => {}
            Some(Relationship::BelongsTo) if last => {}
            Some(Relationship::BelongsTo) => current = schema.model(field.related_model().unwrap_or_default())?,
            _ => {
                return Err(CompileError::InvalidAssignment(format!(
                    "cannot assign through {}.{}",
                    current.name, field.name
                )))
            }
        }
    }
    match &assignment.rhs {
        Operand::Ident(path) => match path.as_slice() {
            [first, ..] if first == "ctx" => ValueDescriptor::from_context_path(path).map(|_| ()),
            [enum_name, value]
                if schema
                    .find_enum(enum_name)
                    .is_some_and(|e| e.values.contains(value)) =>
            {
                Ok(())
            }
            [name] if action.explicit_input(name).is_some() => Ok(()),
            _ => Err(CompileError::UnresolvableIdentifier(path.join("."))),
        },
        Operand::Array(_) => Err(CompileError::UnsupportedArray(format!(
            "cannot assign a list to {}",
            assignment.lhs.join(".")
        ))),
        _ => Ok(()),
    }
}

fn validate_target(schema: &Schema, model: &Model, target: &[String]) -> Result<(), SchemaError> {
    let mut current = model;
    for (i, fragment) in target.iter().enumerate() {
        let field = current
            .field(fragment)
            .ok_or_else(|| SchemaError::Validation(fragment.clone()))?;
        if i + 1 < target.len() {
            let related = field
                .related_model()
                .ok_or_else(|| SchemaError::Validation(fragment.clone()))?;
            current = schema
                .find_model(related)
                .ok_or_else(|| SchemaError::Validation(related.to_string()))?;
        }
    }
    if target.is_empty() {
        return Err(SchemaError::Validation("empty target".into()));
    }
    Ok(())
}
