//! Action runtime: compiles schema-declared actions into parameterized PostgreSQL and
//! runs them with row-level permissions.

pub mod case;
pub mod context;
pub mod error;
pub mod expr;
pub mod record;
pub mod response;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{Identity, RequestContext};
pub use error::{ActionError, CompileError, ErrorBody, SchemaError, TransportError};
pub use record::{FieldValue, Record};
pub use response::{envelope, ActionOutput, PageInfo, PageResult};
pub use schema::Schema;
pub use service::{ActionPipeline, Executor, PgExecutor};
pub use settings::RuntimeConfig;
pub use sql::{QueryBuilder, SqlValue, Statement};
pub use state::AppState;
