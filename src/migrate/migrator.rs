//! Batch-based migration runner backed by a ledger table.

use crate::config::DEFAULT_MIGRATIONS_TABLE;
use crate::db::PgAdapter;
use crate::error::{DbError, DbResult};
use crate::migrate::source::{Migration, MigrationSource};
use crate::models::Row;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub batch: i64,
    pub migrated_at: Option<String>,
}

/// Outcome of [`Migrator::up`]. `batch` is `None` when nothing was pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationRun {
    pub migrated: Vec<String>,
    pub batch: Option<i64>,
}

/// Outcome of [`Migrator::down`] and [`Migrator::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackRun {
    /// Reverted names, in the order they were reverted.
    pub rolled_back: Vec<String>,
    /// Batches touched, newest first.
    pub batches: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshRun {
    pub reset: RollbackRun,
    pub migrated: MigrationRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub ran: bool,
    pub batch: Option<i64>,
}

/// Applies and reverts migrations in batches.
///
/// A batch is every migration applied by one `up` call. Batches are not
/// atomic: if a unit fails, units applied earlier in the same call stay
/// applied and recorded, and the error names the failing unit.
#[derive(Debug, Clone)]
pub struct Migrator {
    adapter: PgAdapter,
    source: Arc<MigrationSource>,
    table: String,
}

impl Migrator {
    pub fn new(adapter: PgAdapter, source: MigrationSource) -> Self {
        Self {
            adapter,
            source: Arc::new(source),
            table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Use a different ledger table.
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Create the ledger table if it does not exist yet.
    pub async fn initialize(&self) -> DbResult<()> {
        let mut adapter = self.adapter.clone();
        let mut schema = adapter.schema();
        if schema.has_table(&self.table).await? {
            return Ok(());
        }
        schema
            .create_table_if_not_exists(&self.table, |t| {
                t.increments("id");
                t.string("name").not_nullable().unique();
                t.integer("batch").not_nullable();
                t.timestamp("migrated_at")
                    .not_nullable()
                    .default_raw("CURRENT_TIMESTAMP");
            })
            .await?;
        info!(table = %self.table, "Created migration ledger");
        Ok(())
    }

    /// Ledger rows in application order.
    pub async fn applied(&self) -> DbResult<Vec<LedgerEntry>> {
        self.initialize().await?;
        let rows = self
            .adapter
            .table(&self.table)
            .select(["id", "name", "batch", "migrated_at"])
            .order_by("id", "asc")
            .get()
            .await?;
        rows.iter().map(ledger_entry).collect()
    }

    /// Discovered migrations not yet in the ledger, in name order.
    pub async fn get_pending(&self) -> DbResult<Vec<Arc<dyn Migration>>> {
        let applied: HashSet<String> = self.applied().await?.into_iter().map(|e| e.name).collect();
        Ok(self
            .source
            .migrations()
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .cloned()
            .collect())
    }

    /// Apply every pending migration as one new batch.
    pub async fn up(&self) -> DbResult<MigrationRun> {
        let pending = self.get_pending().await?;
        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(MigrationRun::default());
        }

        let batch = last_batch(&self.applied().await?).map_or(1, |b| b + 1);
        let mut migrated = Vec::with_capacity(pending.len());
        for migration in pending {
            let name = migration.name().to_string();
            let started = Instant::now();
            self.apply(migration, batch)
                .await
                .map_err(|e| DbError::migration(&name, e))?;
            info!(
                migration = %name,
                batch,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migrated"
            );
            migrated.push(name);
        }

        Ok(MigrationRun {
            migrated,
            batch: Some(batch),
        })
    }

    /// Revert the newest `steps` batches, newest migration first.
    pub async fn down(&self, steps: u32) -> DbResult<RollbackRun> {
        let ledger = self.applied().await?;
        let batches: Vec<i64> = ledger
            .iter()
            .map(|e| e.batch)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .rev()
            .take(steps as usize)
            .collect();

        let mut targets: Vec<&LedgerEntry> = ledger
            .iter()
            .filter(|e| batches.contains(&e.batch))
            .collect();
        targets.sort_by(|a, b| b.batch.cmp(&a.batch).then(b.id.cmp(&a.id)));

        // Resolve every unit before reverting any of them.
        let mut resolved = Vec::with_capacity(targets.len());
        for entry in targets {
            let migration = self.source.get(&entry.name).ok_or_else(|| {
                DbError::invalid_migration(format!(
                    "Ledger entry '{}' (batch {}) has no matching migration",
                    entry.name, entry.batch
                ))
            })?;
            resolved.push((entry.id, migration));
        }

        let mut rolled_back = Vec::with_capacity(resolved.len());
        for (id, migration) in resolved {
            let name = migration.name().to_string();
            self.revert(migration, id)
                .await
                .map_err(|e| DbError::migration(&name, e))?;
            info!(migration = %name, "Rolled back");
            rolled_back.push(name);
        }

        if rolled_back.is_empty() {
            info!("Nothing to roll back");
        }
        Ok(RollbackRun {
            rolled_back,
            batches,
        })
    }

    /// Revert every recorded batch.
    pub async fn reset(&self) -> DbResult<RollbackRun> {
        let highest = last_batch(&self.applied().await?).unwrap_or(0);
        let steps = u32::try_from(highest).map_err(|_| {
            DbError::invalid_migration(format!("Ledger batch number {} is out of range", highest))
        })?;
        self.down(steps).await
    }

    /// `reset` followed by `up`.
    pub async fn refresh(&self) -> DbResult<RefreshRun> {
        let reset = self.reset().await?;
        let migrated = self.up().await?;
        Ok(RefreshRun { reset, migrated })
    }

    /// Ran/pending state of every discovered migration.
    pub async fn status(&self) -> DbResult<Vec<MigrationStatus>> {
        let ledger = self.applied().await?;
        for entry in &ledger {
            if self.source.get(&entry.name).is_none() {
                warn!(migration = %entry.name, "Ledger entry has no matching migration");
            }
        }
        Ok(self
            .source
            .migrations()
            .iter()
            .map(|m| {
                let batch = ledger.iter().find(|e| e.name == m.name()).map(|e| e.batch);
                MigrationStatus {
                    name: m.name().to_string(),
                    ran: batch.is_some(),
                    batch,
                }
            })
            .collect())
    }

    /// Run one `up` together with its ledger insert.
    async fn apply(&self, migration: Arc<dyn Migration>, batch: i64) -> DbResult<()> {
        let table = self.table.clone();
        self.adapter
            .transaction(move |tx| {
                Box::pin(async move {
                    {
                        let mut schema = tx.schema();
                        migration.up(&mut schema).await?;
                    }
                    tx.table(&table)
                        .insert(json!({ "name": migration.name(), "batch": batch }))
                        .execute()
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    /// Run one `down` together with its ledger delete.
    async fn revert(&self, migration: Arc<dyn Migration>, id: i64) -> DbResult<()> {
        let table = self.table.clone();
        self.adapter
            .transaction(move |tx| {
                Box::pin(async move {
                    {
                        let mut schema = tx.schema();
                        migration.down(&mut schema).await?;
                    }
                    tx.table(&table).where_eq("id", id).delete().execute().await?;
                    Ok(())
                })
            })
            .await
    }
}

fn last_batch(ledger: &[LedgerEntry]) -> Option<i64> {
    ledger.iter().map(|e| e.batch).max()
}

fn ledger_entry(row: &Row) -> DbResult<LedgerEntry> {
    let malformed = || DbError::invalid_migration(format!("Malformed ledger row: {:?}", row));
    Ok(LedgerEntry {
        id: row.get("id").and_then(|v| v.as_i64()).ok_or_else(malformed)?,
        name: row
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(malformed)?
            .to_string(),
        batch: row.get("batch").and_then(|v| v.as_i64()).ok_or_else(malformed)?,
        migrated_at: row
            .get("migrated_at")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ledger_entry_parses_row() {
        let entry = ledger_entry(&row(json!({
            "id": 4,
            "name": "001_init",
            "batch": 2,
            "migrated_at": "2024-01-01T00:00:00"
        })))
        .unwrap();
        assert_eq!(entry.id, 4);
        assert_eq!(entry.name, "001_init");
        assert_eq!(entry.batch, 2);
        assert_eq!(entry.migrated_at.as_deref(), Some("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_ledger_entry_rejects_missing_fields() {
        let err = ledger_entry(&row(json!({ "id": 1 }))).unwrap_err();
        assert!(matches!(err, DbError::InvalidMigration { .. }));
    }

    #[test]
    fn test_last_batch() {
        assert_eq!(last_batch(&[]), None);
        let ledger = vec![
            LedgerEntry {
                id: 1,
                name: "001_a".into(),
                batch: 1,
                migrated_at: None,
            },
            LedgerEntry {
                id: 2,
                name: "002_b".into(),
                batch: 3,
                migrated_at: None,
            },
        ];
        assert_eq!(last_batch(&ledger), Some(3));
    }
}
