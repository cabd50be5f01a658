//! pgforge: relational data access for PostgreSQL.
//!
//! - [`query::QueryBuilder`]: fluent SELECT/INSERT/UPDATE/DELETE builder
//!   emitting `?` placeholders and an ordered binding list.
//! - [`schema::Schema`]: CREATE/ALTER/DROP TABLE builder.
//! - [`db::PgAdapter`]: pooled connection with placeholder translation,
//!   transactions and savepoints.
//! - [`migrate::Migrator`]: versioned migrations recorded in a batch ledger.
//! - [`db::Registry`]: named connections with a default.

pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;
pub mod query;
pub mod schema;

pub use config::{AdapterConfig, PoolOptions};
pub use db::{Executor, PgAdapter, PgTransaction, Registry};
pub use error::{DbError, DbResult};
pub use migrate::{Migration, MigrationSource, Migrator};
pub use models::{Binding, ExecResult, Row};
pub use query::QueryBuilder;
pub use schema::{Schema, TableBuilder};
