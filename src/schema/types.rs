//! Schema types matching the JSON the schema compiler emits.

use crate::case::to_snake_case;
use crate::expr::{Assignment, Condition};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Model-level rules; each lists the action types it covers.
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Id,
    Text,
    Number,
    Decimal,
    Boolean,
    Timestamp,
    Date,
    Enum(String),
    Model(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relationship {
    BelongsTo,
    HasOne,
    HasMany,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Declared default; applied by the column DEFAULT, never sent by the runtime.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub foreign_key_field_name: Option<String>,
    #[serde(default)]
    pub inverse_field_name: Option<String>,
}

impl Field {
    pub fn column(&self) -> String {
        to_snake_case(&self.name)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn related_model(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Model(name) => Some(name),
            _ => None,
        }
    }

    pub fn relationship(&self) -> Option<Relationship> {
        self.related_model()?;
        Some(if self.foreign_key_field_name.is_some() {
            Relationship::BelongsTo
        } else if self.repeated {
            Relationship::HasMany
        } else {
            Relationship::HasOne
        })
    }

    pub fn is_relationship(&self) -> bool {
        self.related_model().is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn is_write(&self) -> bool {
        matches!(self, ActionType::Create | ActionType::Update | ActionType::Delete)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
    #[serde(default, rename = "where")]
    pub where_expressions: Vec<Condition>,
    #[serde(default, rename = "set")]
    pub set_expressions: Vec<Assignment>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub sortable: Vec<String>,
    /// Relationship paths loaded alongside get and list results, e.g. `["author", "posts"]`.
    #[serde(default)]
    pub embeds: Vec<Vec<String>>,
}

impl Action {
    pub fn explicit_input(&self, name: &str) -> Option<&Input> {
        self.inputs
            .iter()
            .find(|i| i.behaviour == InputBehaviour::Explicit && i.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputBehaviour {
    Implicit,
    Explicit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Read,
    Write,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub name: String,
    /// Field path from the action's model; empty for explicit inputs.
    #[serde(default)]
    pub target: Vec<String>,
    pub behaviour: InputBehaviour,
    pub mode: InputMode,
    #[serde(default)]
    pub optional: bool,
    /// Declared type of an explicit input.
    #[serde(default, rename = "type")]
    pub input_type: Option<FieldType>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default)]
    pub expression: Option<Condition>,
    #[serde(default)]
    pub actions: Vec<ActionType>,
    /// Role-based rules are resolved elsewhere and carry no expression.
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}
