//! Fluent SQL query builder.
//!
//! Builders emit neutral `?` placeholders; the executor rewrites them for
//! the backend at run time.

pub mod builder;
pub mod compiler;
pub mod state;

pub use builder::QueryBuilder;
pub use compiler::CompiledQuery;
pub use state::{Conjunction, Direction, JoinKind, Operation, Operator, QueryState};
