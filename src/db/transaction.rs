//! Transaction-scoped executor.
//!
//! A [`PgTransaction`] wraps one open `sqlx` transaction. Everything run
//! through it shares that single connection, so statements observe each
//! other's effects and commit or roll back together. Instances are only
//! handed out by [`PgAdapter::transaction`](crate::db::PgAdapter::transaction),
//! which owns the commit/rollback decision.

use crate::db::executor::{self, Executor};
use crate::error::{DbError, DbResult};
use crate::models::{Binding, Dialect, ExecResult, Row};
use crate::query::QueryBuilder;
use crate::schema::Schema;
use futures_util::future::BoxFuture;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::debug;

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    query_timeout: Duration,
    /// Active savepoints, oldest first.
    savepoints: Vec<String>,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction")
            .field("query_timeout", &self.query_timeout)
            .field("savepoints", &self.savepoints)
            .finish_non_exhaustive()
    }
}

impl PgTransaction {
    pub(crate) fn new(tx: Transaction<'static, Postgres>, query_timeout: Duration) -> Self {
        Self {
            tx,
            query_timeout,
            savepoints: Vec::new(),
        }
    }

    pub(crate) async fn commit(self) -> DbResult<()> {
        self.tx.commit().await.map_err(DbError::from)
    }

    pub(crate) async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await.map_err(DbError::from)
    }

    pub async fn query(&mut self, sql: &str, bindings: &[Binding]) -> DbResult<Vec<Row>> {
        executor::fetch_rows(&mut *self.tx, sql, bindings, self.query_timeout).await
    }

    pub async fn execute(&mut self, sql: &str, bindings: &[Binding]) -> DbResult<ExecResult> {
        executor::execute_write(&mut *self.tx, sql, bindings, self.query_timeout).await
    }

    /// Set a named checkpoint inside this transaction.
    pub async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        validate_savepoint_name(name)?;
        self.execute(&format!("SAVEPOINT {}", name), &[]).await?;
        // Re-using a name shadows the older savepoint; keep the newest last.
        self.savepoints.push(name.to_string());
        debug!(savepoint = %name, "Savepoint created");
        Ok(())
    }

    /// Undo everything after `name`. The savepoint itself stays usable.
    pub async fn rollback_to(&mut self, name: &str) -> DbResult<()> {
        let position = self.find_savepoint(name)?;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[])
            .await?;
        self.savepoints.truncate(position + 1);
        debug!(savepoint = %name, "Rolled back to savepoint");
        Ok(())
    }

    /// Forget `name` (and any savepoint created after it), keeping their work.
    pub async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        let position = self.find_savepoint(name)?;
        self.execute(&format!("RELEASE SAVEPOINT {}", name), &[])
            .await?;
        self.savepoints.truncate(position);
        debug!(savepoint = %name, "Savepoint released");
        Ok(())
    }

    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    /// A query builder running inside this transaction.
    pub fn table(&mut self, name: &str) -> QueryBuilder<&mut PgTransaction> {
        QueryBuilder::on(self, name)
    }

    /// A schema builder running inside this transaction.
    pub fn schema(&mut self) -> Schema<'_> {
        Schema::new(self)
    }

    fn find_savepoint(&self, name: &str) -> DbResult<usize> {
        self.savepoints
            .iter()
            .rposition(|s| s == name)
            .ok_or_else(|| DbError::transaction(format!("Unknown savepoint '{}'", name)))
    }
}

impl Executor for PgTransaction {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<Vec<Row>>> {
        Box::pin(PgTransaction::query(self, sql, bindings))
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(PgTransaction::execute(self, sql, bindings))
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }
}

/// Savepoint names are spliced into SQL, so only plain identifiers pass.
fn validate_savepoint_name(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid && name.len() <= 63 {
        Ok(())
    } else {
        Err(DbError::transaction(format!(
            "Invalid savepoint name '{}': use letters, digits and underscores",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_savepoint_name() {
        assert!(validate_savepoint_name("before_update").is_ok());
        assert!(validate_savepoint_name("_sp1").is_ok());
        assert!(validate_savepoint_name("").is_err());
        assert!(validate_savepoint_name("1sp").is_err());
        assert!(validate_savepoint_name("sp; DROP TABLE users").is_err());
        assert!(validate_savepoint_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_invalid_savepoint_is_transaction_error() {
        let err = validate_savepoint_name("bad-name").unwrap_err();
        assert!(matches!(err, DbError::Transaction { .. }));
    }
}
