//! Database access layer.
//!
//! This module provides:
//! - The [`Executor`] seam shared by the builders
//! - The pooled [`PgAdapter`] and its transaction-scoped [`PgTransaction`]
//! - `?` → `$n` placeholder translation
//! - Parameter binding and row decoding
//! - The named connection [`Registry`]

pub mod adapter;
pub mod executor;
pub mod params;
pub mod placeholder;
pub mod registry;
pub mod transaction;
pub mod types;

pub use adapter::PgAdapter;
pub use executor::Executor;
pub use registry::Registry;
pub use transaction::PgTransaction;
