//! Resolve a field path such as `parent.owner.name` to a column, synthesizing one join per
//! relationship crossed. Join aliases chain as `<parentAlias>$<fieldName>`.

use crate::case::to_snake_case;
use crate::error::CompileError;
use crate::schema::{Field, Model, Relationship, Schema};
use crate::sql::{ColumnRef, Join, JoinKind};

#[derive(Debug)]
pub struct ResolvedColumn<'a> {
    pub column: ColumnRef,
    pub joins: Vec<Join>,
    /// A repeated relationship was crossed: the column yields many values per root row.
    pub through_many: bool,
    /// Field the column belongs to; for a relationship at the end of the path this is the
    /// key field holding the related id.
    pub field: &'a Field,
    pub model: &'a Model,
}

/// `path` excludes the root model fragment.
pub fn resolve_path<'a>(
    schema: &'a Schema,
    model: &'a Model,
    path: &[String],
    kind: JoinKind,
) -> Result<ResolvedColumn<'a>, CompileError> {
    let Some((last, middle)) = path.split_last() else {
        return Err(CompileError::UnresolvableIdentifier(model.expression_root()));
    };
    let mut alias = model.table();
    let mut current = model;
    let mut joins = Vec::new();
    let mut through_many = false;

    for fragment in middle {
        let field = current.field_or_err(fragment)?;
        if !field.is_relationship() {
            return Err(CompileError::UnresolvableIdentifier(format!(
                "{}.{} is not a relationship",
                current.name, fragment
            )));
        }
        let (join, related) = relationship_join(schema, current, field, &alias, kind)?;
        through_many |= field.repeated;
        alias = join.alias.clone();
        joins.push(join);
        current = related;
    }

    let field = current.field_or_err(last)?;
    match field.relationship() {
        None => Ok(ResolvedColumn {
            column: ColumnRef::new(alias, field.column()),
            joins,
            through_many,
            field,
            model: current,
        }),
        Some(Relationship::BelongsTo) => {
            let fk_name = field.foreign_key_field_name.as_deref().unwrap_or_default();
            let fk_field = current.field_or_err(fk_name)?;
            Ok(ResolvedColumn {
                column: ColumnRef::new(alias, fk_field.column()),
                joins,
                through_many,
                field: fk_field,
                model: current,
            })
        }
        Some(_) => {
            let (join, related) = relationship_join(schema, current, field, &alias, kind)?;
            let pk = related.primary_key().ok_or_else(|| CompileError::UnknownField {
                model: related.name.clone(),
                field: "id".into(),
            })?;
            let column = ColumnRef::new(join.alias.clone(), pk.column());
            joins.push(join);
            Ok(ResolvedColumn {
                column,
                joins,
                through_many: through_many || field.repeated,
                field: pk,
                model: related,
            })
        }
    }
}

/// Join from `alias` (an instance of `model`) across `field` to the related model.
pub fn relationship_join<'a>(
    schema: &'a Schema,
    model: &Model,
    field: &Field,
    alias: &str,
    kind: JoinKind,
) -> Result<(Join, &'a Model), CompileError> {
    let related_name = field
        .related_model()
        .ok_or_else(|| CompileError::UnresolvableIdentifier(field.name.clone()))?;
    let related = schema.model(related_name)?;
    let right_alias = format!("{}${}", alias, to_snake_case(&field.name));
    let fk = schema.foreign_key_column(model, field)?;
    // inner joins put the joined table first in the ON clause, left joins the parent
    let (joined, parent) = match field.relationship() {
        Some(Relationship::BelongsTo) => (
            ColumnRef::new(right_alias.clone(), related.primary_key_column()),
            ColumnRef::new(alias, fk),
        ),
        _ => (
            ColumnRef::new(right_alias.clone(), fk),
            ColumnRef::new(alias, model.primary_key_column()),
        ),
    };
    let (left, right) = match kind {
        JoinKind::Inner => (joined, parent),
        JoinKind::Left => (parent, joined),
    };
    Ok((
        Join {
            kind,
            table: related.table(),
            alias: right_alias,
            left,
            right,
        },
        related,
    ))
}
