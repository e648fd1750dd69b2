//! Typed errors per layer and the caller-visible error body.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model}")]
    InvalidPrimaryKey { model: String },
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("schema load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("expression in {owner}: {source}")]
    Expression { owner: String, source: CompileError },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Raised while turning schema expressions into SQL. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("model {model} has no field {field}")]
    UnknownField { model: String, field: String },
    #[error("unresolvable identifier: {0}")]
    UnresolvableIdentifier(String),
    #[error("operator {operator} cannot be used here: {reason}")]
    UnsupportedOperator { operator: String, reason: String },
    #[error("unsupported array usage: {0}")]
    UnsupportedArray(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("transaction: {0}")]
    Transaction(String),
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::NotFound(_) => "not_found",
            ActionError::PermissionDenied(_) => "permission_denied",
            ActionError::Validation(_) => "validation_error",
            ActionError::Compile(_) => "compile_error",
            ActionError::Transport(_) => "database_error",
            ActionError::Cancelled => "cancelled",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    /// With `conceal_not_found`, a denied request renders exactly like a missing record so
    /// callers cannot probe for rows they may not read.
    pub fn from_error(err: &ActionError, conceal_not_found: bool) -> Self {
        let (code, message) = match err {
            ActionError::NotFound(_) | ActionError::PermissionDenied(_) if conceal_not_found => {
                ("not_found".to_string(), "record not found".to_string())
            }
            // internal detail stays in the logs
            ActionError::Transport(_) => (err.code().to_string(), "database error".to_string()),
            _ => (err.code().to_string(), err.to_string()),
        };
        ErrorBody {
            error: ErrorDetail {
                code,
                message,
                details: None,
            },
        }
    }
}
