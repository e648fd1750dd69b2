//! Shared runtime state: one pool, the loaded schema and the runtime configuration.

use crate::context::RequestContext;
use crate::error::ActionError;
use crate::response::ActionOutput;
use crate::schema::Schema;
use crate::service::{ActionPipeline, PgExecutor};
use crate::settings::RuntimeConfig;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub schema: Arc<Schema>,
    pub config: Arc<RuntimeConfig>,
}

impl AppState {
    pub fn new(pool: PgPool, schema: Schema, config: RuntimeConfig) -> Self {
        AppState {
            pool,
            schema: Arc::new(schema),
            config: Arc::new(config),
        }
    }

    pub fn pipeline(&self) -> ActionPipeline<'_> {
        ActionPipeline::new(&self.schema, &self.config)
    }

    /// Run `action` on a fresh executor borrowed from the pool.
    pub async fn run(&self, ctx: &RequestContext, action: &str, input: &Value) -> Result<ActionOutput, ActionError> {
        let mut executor = PgExecutor::new(self.pool.clone());
        self.pipeline().execute(&mut executor, ctx, action, input).await
    }

    /// `run`, rendered as the response envelope.
    pub async fn respond(&self, ctx: &RequestContext, action: &str, input: &Value) -> Value {
        let result = self.run(ctx, action, input).await;
        crate::response::envelope(&result, self.config.conceal_not_found)
    }
}
