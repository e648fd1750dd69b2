pub mod condition;
pub mod evaluate;

pub use condition::*;
pub use evaluate::*;
