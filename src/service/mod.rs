//! ActionPipeline: runs schema actions against an executor.

pub mod args;
pub mod authorize;
pub mod embed;
mod executor;
pub mod filters;
mod pipeline;
pub mod writes;

pub use authorize::Authorization;
pub use executor::{Executor, PgExecutor};
pub use pipeline::{ActionPipeline, Stage};
