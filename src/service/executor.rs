//! Database executor contract and its PostgreSQL implementation.

use crate::context::RequestContext;
use crate::error::{ActionError, TransportError};
use crate::record::Row;
use crate::sql::Statement;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;

/// One logical connection per action invocation. While a transaction is open every
/// statement runs inside it.
#[async_trait]
pub trait Executor: Send {
    async fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransportError>;

    /// Rows affected.
    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, TransportError>;

    async fn begin(&mut self) -> Result<(), TransportError>;

    async fn commit(&mut self) -> Result<(), TransportError>;

    /// No-op without an open transaction.
    async fn rollback(&mut self) -> Result<(), TransportError>;
}

/// Race a database call against the request's cancellation token.
pub(crate) async fn guarded<T>(
    ctx: &RequestContext,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, ActionError> {
    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(ActionError::Cancelled),
        result = fut => result.map_err(ActionError::from),
    }
}

pub struct PgExecutor {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        PgExecutor { pool, tx: None }
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn execute_query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransportError> {
        let sql = statement.to_positional();
        tracing::debug!(sql = %sql, args = ?statement.args(), "query");
        let mut query = sqlx::query(&sql);
        for arg in statement.args() {
            query = query.bind(arg.clone());
        }
        let rows = match self.tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn execute_statement(&mut self, statement: &Statement) -> Result<u64, TransportError> {
        let sql = statement.to_positional();
        tracing::debug!(sql = %sql, args = ?statement.args(), "execute");
        let mut query = sqlx::query(&sql);
        for arg in statement.args() {
            query = query.bind(arg.clone());
        }
        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> Result<(), TransportError> {
        if self.tx.is_some() {
            return Err(TransportError::Transaction("transaction already open".into()));
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| TransportError::Transaction("no open transaction".into()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn row_to_map(row: &sqlx::postgres::PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(f64::from(n)) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    if let Ok(Some(items)) = row.try_get::<Option<Vec<String>>, _>(name) {
        return Value::Array(items.into_iter().map(Value::String).collect());
    }
    Value::Null
}
