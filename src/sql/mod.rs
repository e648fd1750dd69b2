//! SQL generation: identifiers come from the validated schema and are always quoted,
//! values are always `?` placeholders.

mod builder;
pub mod condition;
mod operand;
pub mod pagination;
pub mod params;
pub mod permissions;
pub mod resolve;
mod statement;

pub use builder::*;
pub use condition::{ArgumentSource, ConditionCompiler};
pub use operand::*;
pub use pagination::{apply_page, parse_page, sort_key, Page};
pub use params::*;
pub use permissions::{applicable_rules, check_rules, compile_permissions, PermissionQuery};
pub use statement::*;
