pub mod loader;
pub mod types;
pub mod validator;

pub use loader::*;
pub use types::*;
pub use validator::*;

use crate::case::{to_lower_camel, to_snake_case};
use crate::error::CompileError;

impl Schema {
    pub fn find_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn model(&self, name: &str) -> Result<&Model, CompileError> {
        self.find_model(name)
            .ok_or_else(|| CompileError::UnknownModel(name.to_string()))
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Action names are unique across the schema.
    pub fn find_action(&self, name: &str) -> Option<(&Model, &Action)> {
        self.models
            .iter()
            .find_map(|m| m.actions.iter().find(|a| a.name == name).map(|a| (m, a)))
    }

    /// Column on the foreign-key side of a relationship field: for belongs-to it lives on
    /// `model`, for has-one/has-many it lives on the related model.
    pub fn foreign_key_column(&self, model: &Model, field: &Field) -> Result<String, CompileError> {
        match field.relationship() {
            Some(Relationship::BelongsTo) => field
                .foreign_key_field_name
                .as_deref()
                .map(to_snake_case)
                .ok_or_else(|| CompileError::UnresolvableIdentifier(field.name.clone())),
            Some(_) => {
                let inverse = self.inverse_field(model, field)?;
                self.foreign_key_column(self.model(field.related_model().unwrap_or_default())?, inverse)
            }
            None => Err(CompileError::TypeMismatch(format!(
                "{}.{} is not a relationship",
                model.name, field.name
            ))),
        }
    }

    /// The belongs-to field on the related model pointing back at `model`.
    pub fn inverse_field<'a>(&'a self, model: &Model, field: &Field) -> Result<&'a Field, CompileError> {
        let related_name = field
            .related_model()
            .ok_or_else(|| CompileError::UnresolvableIdentifier(field.name.clone()))?;
        let related = self.model(related_name)?;
        let found = match &field.inverse_field_name {
            Some(inverse) => related.field(inverse),
            None => related.fields.iter().find(|f| {
                f.relationship() == Some(Relationship::BelongsTo) && f.related_model() == Some(model.name.as_str())
            }),
        };
        found.ok_or_else(|| CompileError::UnknownField {
            model: related.name.clone(),
            field: field.inverse_field_name.clone().unwrap_or_else(|| model.name.clone()),
        })
    }
}

impl Model {
    pub fn table(&self) -> String {
        to_snake_case(&self.name)
    }

    /// How expressions name this model: `OrderItem` is `orderItem`.
    pub fn expression_root(&self) -> String {
        to_lower_camel(&self.name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_or_err(&self, name: &str) -> Result<&Field, CompileError> {
        self.field(name).ok_or_else(|| CompileError::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Field flagged `primaryKey`, else the field named `id`. The validator guarantees one exists.
    pub fn primary_key(&self) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .or_else(|| self.field("id"))
    }

    pub fn primary_key_column(&self) -> String {
        self.primary_key()
            .map(Field::column)
            .unwrap_or_else(|| "id".to_string())
    }

    /// Field whose column is `column`; relationship fields have no column.
    pub fn field_for_column(&self, column: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| !f.is_relationship() && f.column() == column)
    }
}
