//! Data models shared by the adapter, builders and migrator.
//!
//! This module re-exports all model types used throughout the crate.

pub mod binding;
pub mod connection;
pub mod result;

// Re-export commonly used types
pub use binding::Binding;
pub use connection::{ConnectionRecord, Dialect, HealthReport, PoolStats};
pub use result::{ExecResult, Page, Pagination, Row};
