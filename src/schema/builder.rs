//! Schema-level operations executed through an [`Executor`].

use crate::db::Executor;
use crate::error::{DbError, DbResult};
use crate::models::{Binding, Dialect, ExecResult, Row};
use crate::schema::table::TableBuilder;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

/// Runs DDL on one connection: the pool, or a single transaction.
///
/// `alter_table` executes its statements one by one; wrap the calls in a
/// transaction when a partial alteration must not survive a failure.
pub struct Schema<'c> {
    conn: &'c mut dyn Executor,
}

impl std::fmt::Debug for Schema<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("dialect", &self.conn.dialect())
            .finish()
    }
}

impl<'c> Schema<'c> {
    pub fn new(conn: &'c mut dyn Executor) -> Self {
        Self { conn }
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub async fn create_table<F>(&mut self, name: &str, define: F) -> DbResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::create(name);
        define(&mut table);
        self.apply(table).await
    }

    pub async fn create_table_if_not_exists<F>(&mut self, name: &str, define: F) -> DbResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::create(name);
        table.if_not_exists();
        define(&mut table);
        self.apply(table).await
    }

    pub async fn alter_table<F>(&mut self, name: &str, define: F) -> DbResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::alter(name);
        define(&mut table);
        self.apply(table).await
    }

    pub async fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.run(&format!("DROP TABLE {}", name)).await?;
        info!(table = %name, "Dropped table");
        Ok(())
    }

    pub async fn drop_table_if_exists(&mut self, name: &str) -> DbResult<()> {
        self.run(&format!("DROP TABLE IF EXISTS {}", name)).await?;
        info!(table = %name, "Dropped table if present");
        Ok(())
    }

    pub async fn rename_table(&mut self, from: &str, to: &str) -> DbResult<()> {
        self.run(&format!("ALTER TABLE {} RENAME TO {}", from, to))
            .await?;
        info!(from = %from, to = %to, "Renamed table");
        Ok(())
    }

    pub async fn has_table(&mut self, name: &str) -> DbResult<bool> {
        let sql = self.dialect().has_table_sql();
        let rows = self.conn.query(sql, &[Binding::from(name)]).await?;
        Ok(read_count(&rows)? > 0)
    }

    pub async fn has_column(&mut self, table: &str, column: &str) -> DbResult<bool> {
        let sql = self.dialect().has_column_sql();
        let rows = self
            .conn
            .query(sql, &[Binding::from(table), Binding::from(column)])
            .await?;
        Ok(read_count(&rows)? > 0)
    }

    /// Execute a statement verbatim. Several `;`-separated statements are
    /// allowed.
    pub async fn raw(&mut self, sql: &str) -> DbResult<ExecResult> {
        self.conn.execute(sql, &[]).await
    }

    async fn apply(&mut self, table: TableBuilder) -> DbResult<()> {
        let statements = table.statements(self.dialect())?;
        for sql in &statements {
            self.run(sql).await?;
        }
        info!(
            table = %table.name(),
            mode = ?table.mode(),
            statements = statements.len(),
            "Applied table definition"
        );
        Ok(())
    }

    async fn run(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql = %sql, "Executing DDL");
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }
}

fn read_count(rows: &[Row]) -> DbResult<u64> {
    rows.first()
        .and_then(|row| row.get("aggregate"))
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| DbError::build("Catalog lookup returned no count"))
}
