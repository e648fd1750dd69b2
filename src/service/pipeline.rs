//! Run one action end to end: capture writes, apply filters, authorize, execute and shape
//! the result.
//!
//! Reads go straight to the executor. Writes run inside one transaction; anything that
//! fails after `BEGIN`, including a late permission check, rolls it back.

use crate::context::RequestContext;
use crate::error::{ActionError, CompileError, TransportError};
use crate::record::{Record, Row};
use crate::response::{ActionOutput, PageResult};
use crate::schema::{Action, ActionType, Model, Schema};
use crate::service::args::{RequestArgs, RequestValues};
use crate::service::authorize::{authorize_early, authorize_rows, row_key, Authorization};
use crate::service::embed::{resolve_embeds, EmbedTree};
use crate::service::executor::{guarded, Executor};
use crate::service::filters::{apply_explicit_filters, apply_implicit_filters};
use crate::service::writes::capture_writes;
use crate::settings::RuntimeConfig;
use crate::sql::pagination::take_page_info;
use crate::sql::{apply_page, compile_permissions, parse_page, sort_key, Page, PermissionQuery, QueryBuilder, SqlValue, Statement};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    CaptureWrites,
    ApplyImplicitFilters,
    ApplyExplicitFilters,
    Authorize,
    Execute,
    Shape,
    Done,
    Failed,
}

pub struct ActionPipeline<'a> {
    schema: &'a Schema,
    config: &'a RuntimeConfig,
}

struct Planned {
    query: QueryBuilder,
    page: Page,
}

/// State of a single invocation.
struct Invocation<'a> {
    schema: &'a Schema,
    config: &'a RuntimeConfig,
    model: &'a Model,
    action: &'a Action,
    ctx: &'a RequestContext,
    stage: Stage,
}

impl<'a> ActionPipeline<'a> {
    pub fn new(schema: &'a Schema, config: &'a RuntimeConfig) -> Self {
        ActionPipeline { schema, config }
    }

    fn invocation<'r>(&'r self, ctx: &'r RequestContext, action_name: &str) -> Result<Invocation<'r>, ActionError> {
        let (model, action) = self
            .schema
            .find_action(action_name)
            .ok_or_else(|| ActionError::NotFound(format!("action {}", action_name)))?;
        Ok(Invocation {
            schema: self.schema,
            config: self.config,
            model,
            action,
            ctx,
            stage: Stage::Init,
        })
    }

    pub async fn execute<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        ctx: &RequestContext,
        action_name: &str,
        input: &Value,
    ) -> Result<ActionOutput, ActionError> {
        let mut run = self.invocation(ctx, action_name)?;
        let started = Instant::now();
        debug!(action = %action_name, model = %run.model.name, "action started");
        let result = run.execute(executor, input).await;
        match &result {
            Ok(_) => {
                run.enter(Stage::Done);
                info!(
                    action = %action_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "action completed"
                );
            }
            Err(err) => {
                let failed_at = run.stage;
                run.stage = Stage::Failed;
                warn!(
                    action = %action_name,
                    stage = ?failed_at,
                    code = err.code(),
                    error = %err,
                    "action failed"
                );
            }
        }
        result
    }

    /// The main statement `action_name` would run for `input`, without authorizing or
    /// touching the database.
    pub fn statement(&self, ctx: &RequestContext, action_name: &str, input: &Value) -> Result<Statement, ActionError> {
        let mut run = self.invocation(ctx, action_name)?;
        let args = RequestArgs::from_input(run.action.action_type, input)?;
        let mut values = RequestValues::new(run.schema, run.action, ctx, run.config, &args)?;
        let planned = run.plan(&args, &mut values)?;
        match run.action.action_type {
            ActionType::Get | ActionType::List => Ok(planned.query.to_select()),
            ActionType::Create => Ok(planned.query.to_insert()),
            ActionType::Update => Ok(planned.query.to_update()?),
            ActionType::Delete => Ok(planned.query.to_delete()),
        }
    }

    /// Compiled row-level permission query for `action_name`, if any rule needs one.
    pub fn permission_query(&self, action_name: &str) -> Result<Option<PermissionQuery>, ActionError> {
        let (model, action) = self
            .schema
            .find_action(action_name)
            .ok_or_else(|| ActionError::NotFound(format!("action {}", action_name)))?;
        Ok(compile_permissions(self.schema, model, action)?)
    }
}

async fn rollback<E: Executor + ?Sized>(executor: &mut E, action: &str) {
    match executor.rollback().await {
        Ok(()) => debug!(action = %action, "transaction rolled back"),
        Err(err) => warn!(action = %action, error = %err, "rollback failed"),
    }
}

impl Invocation<'_> {
    fn enter(&mut self, stage: Stage) {
        debug!(action = %self.action.name, stage = ?stage, "stage");
        self.stage = stage;
    }

    fn not_found(&self) -> ActionError {
        ActionError::NotFound(format!("{} not found", self.model.name))
    }

    async fn embed<E: Executor + ?Sized>(&self, executor: &mut E, records: &mut [Record]) -> Result<(), ActionError> {
        let tree = EmbedTree::from_paths(&self.action.embeds);
        if tree.is_empty() || records.is_empty() {
            return Ok(());
        }
        resolve_embeds(executor, self.ctx, self.schema, self.model, &tree, records).await
    }

    fn keys(&self, rows: &[Row]) -> Result<Vec<SqlValue>, ActionError> {
        let pk = self.model.primary_key_column();
        rows.iter()
            .map(|row| {
                row_key(row, &pk).ok_or_else(|| {
                    ActionError::Compile(CompileError::UnknownField {
                        model: self.model.name.clone(),
                        field: pk.clone(),
                    })
                })
            })
            .collect()
    }

    fn plan(&mut self, args: &RequestArgs, values: &mut RequestValues<'_>) -> Result<Planned, ActionError> {
        let kind = self.action.action_type;
        let mut query = QueryBuilder::new(self.model);
        if matches!(kind, ActionType::Create | ActionType::Update) {
            self.enter(Stage::CaptureWrites);
            query.set_write_values(capture_writes(self.schema, self.model, self.action, args, values)?);
        }
        if kind != ActionType::Create {
            self.enter(Stage::ApplyImplicitFilters);
            apply_implicit_filters(self.schema, self.model, self.action, args, &mut query)?;
            self.enter(Stage::ApplyExplicitFilters);
            apply_explicit_filters(self.schema, self.model, self.action, values, &mut query)?;
        }
        let mut page = Page::first(self.config.default_page_size);
        match kind {
            ActionType::Get => {
                query.select_all();
                query.distinct_on(query.primary_key());
            }
            ActionType::List => {
                query.select_all();
                page = parse_page(&args.paging, self.config)?;
                let sort = sort_key(self.model, self.action, args.paging.get("orderBy"))?;
                apply_page(&mut query, self.model, &page, &sort)?;
            }
            _ => {}
        }
        Ok(Planned { query, page })
    }

    async fn execute<E: Executor + ?Sized>(&mut self, executor: &mut E, input: &Value) -> Result<ActionOutput, ActionError> {
        let args = RequestArgs::from_input(self.action.action_type, input)?;
        let mut values = RequestValues::new(self.schema, self.action, self.ctx, self.config, &args)?;
        let planned = self.plan(&args, &mut values)?;

        self.enter(Stage::Authorize);
        let authorization = authorize_early(self.schema, self.model, self.action, &values)?;
        if authorization == Authorization::Denied {
            return Err(ActionError::PermissionDenied(format!(
                "not permitted to run {}",
                self.action.name
            )));
        }

        self.enter(Stage::Execute);
        match self.action.action_type {
            ActionType::Get => self.get(executor, planned, &authorization).await,
            ActionType::List => self.list(executor, planned, &authorization).await,
            _ => self.write(executor, planned, &authorization).await,
        }
    }

    async fn get<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        planned: Planned,
        authorization: &Authorization,
    ) -> Result<ActionOutput, ActionError> {
        let mut rows = guarded(self.ctx, executor.execute_query(&planned.query.to_select())).await?;
        if rows.len() > 1 {
            return Err(ActionError::Validation(format!(
                "{} matched {} records",
                self.action.name,
                rows.len()
            )));
        }
        let row = rows.pop().ok_or_else(|| self.not_found())?;
        if let Authorization::Deferred(query) = authorization {
            let ids = self.keys(std::slice::from_ref(&row))?;
            authorize_rows(executor, self.ctx, self.config, query, &ids).await?;
        }
        self.enter(Stage::Shape);
        let mut records = [Record::from_row(self.model, row)];
        self.embed(executor, &mut records).await?;
        let [record] = records;
        Ok(ActionOutput::Record(record))
    }

    async fn list<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        planned: Planned,
        authorization: &Authorization,
    ) -> Result<ActionOutput, ActionError> {
        let mut rows = guarded(self.ctx, executor.execute_query(&planned.query.to_select())).await?;
        if let Authorization::Deferred(query) = authorization {
            let ids = self.keys(&rows)?;
            authorize_rows(executor, self.ctx, self.config, query, &ids).await?;
        }
        self.enter(Stage::Shape);
        let page_info = take_page_info(&mut rows, &planned.page, &self.model.primary_key_column());
        let mut results: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_row(self.model, row))
            .collect();
        self.embed(executor, &mut results).await?;
        Ok(ActionOutput::Page(PageResult { results, page_info }))
    }

    async fn write<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        planned: Planned,
        authorization: &Authorization,
    ) -> Result<ActionOutput, ActionError> {
        guarded(self.ctx, executor.begin()).await?;
        let outcome = match self.mutate(executor, &planned.query, authorization).await {
            Ok(output) => guarded(self.ctx, executor.commit()).await.map(|_| output),
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            rollback(executor, &self.action.name).await;
        }
        outcome
    }

    async fn mutate<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        query: &QueryBuilder,
        authorization: &Authorization,
    ) -> Result<ActionOutput, ActionError> {
        let kind = self.action.action_type;
        if kind == ActionType::Create {
            let rows = guarded(self.ctx, executor.execute_query(&query.to_insert())).await?;
            let row = rows
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::Transaction("insert returned no row".into()))?;
            if let Authorization::Deferred(permissions) = authorization {
                let ids = self.keys(std::slice::from_ref(&row))?;
                authorize_rows(executor, self.ctx, self.config, permissions, &ids).await?;
            }
            self.enter(Stage::Shape);
            return Ok(ActionOutput::Record(Record::from_row(self.model, row)));
        }

        // rows the write would touch are authorized before they change
        if let Authorization::Deferred(permissions) = authorization {
            let candidates = guarded(self.ctx, executor.execute_query(&query.to_select_keys())).await?;
            if candidates.is_empty() {
                return Err(self.not_found());
            }
            let ids = self.keys(&candidates)?;
            authorize_rows(executor, self.ctx, self.config, permissions, &ids).await?;
        }

        let statement = match kind {
            ActionType::Update => query.to_update()?,
            ActionType::Delete => query.to_delete(),
            _ => {
                return Err(ActionError::Validation(format!(
                    "{} is not a write action",
                    self.action.name
                )))
            }
        };
        let mut rows = guarded(self.ctx, executor.execute_query(&statement)).await?;
        if rows.is_empty() {
            return Err(self.not_found());
        }
        self.enter(Stage::Shape);
        if kind == ActionType::Delete {
            return Ok(ActionOutput::Deleted(true));
        }
        if rows.len() > 1 {
            return Err(ActionError::Validation(format!(
                "{} matched {} records",
                self.action.name,
                rows.len()
            )));
        }
        Ok(ActionOutput::Record(Record::from_row(self.model, rows.remove(0))))
    }
}
