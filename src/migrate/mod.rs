//! Migration manager: discovery, batch ledger and the up/down runner.

pub mod migrator;
pub mod source;

pub use migrator::{LedgerEntry, MigrationRun, MigrationStatus, Migrator, RefreshRun, RollbackRun};
pub use source::{Migration, MigrationSource, SqlMigration};
