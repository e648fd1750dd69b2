//! Load a schema from JSON text or a file. Every load is validated before it is returned.

use crate::error::SchemaError;
use crate::schema::{validate, Schema};
use std::path::Path;

impl Schema {
    pub fn from_json(json: &str) -> Result<Schema, SchemaError> {
        let schema: Schema = serde_json::from_str(json)?;
        validate(&schema)?;
        Ok(schema)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Schema, SchemaError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
        let schema = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            models = schema.models.len(),
            "schema loaded"
        );
        Ok(schema)
    }
}
