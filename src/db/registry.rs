//! Named connection registry.
//!
//! A [`Registry`] owns any number of [`PgAdapter`]s under unique names and
//! hands out builders bound to them. It is an explicitly constructed value,
//! cheap to clone, and safe to share between tasks.

use crate::config::AdapterConfig;
use crate::db::adapter::PgAdapter;
use crate::db::transaction::PgTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{Binding, ConnectionRecord, ExecResult, HealthReport, PoolStats, Row};
use crate::query::QueryBuilder;
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct RegistryEntry {
    adapter: PgAdapter,
    record: ConnectionRecord,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    default: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect and register an adapter under `name`.
    ///
    /// The first connection added becomes the default.
    pub async fn add_connection(
        &self,
        name: &str,
        config: AdapterConfig,
    ) -> DbResult<ConnectionRecord> {
        // Early check for existing connection
        {
            let state = self.state.read().await;
            if state.entries.contains_key(name) {
                return Err(DbError::duplicate_connection(name));
            }
        }

        info!(connection = %name, url = %config.masked_url(), "Registering connection");
        let adapter = PgAdapter::connect(config).await?;

        let record = ConnectionRecord {
            name: name.to_string(),
            dialect: adapter.dialect(),
            url: adapter.config().masked_url(),
            connected_at: Utc::now(),
        };

        // Re-check after async work to prevent TOCTOU race
        // If duplicate detected, return the adapter so we can close it outside the lock
        let adapter_to_close = {
            let mut state = self.state.write().await;
            if state.entries.contains_key(name) {
                Some(adapter)
            } else {
                state.entries.insert(
                    name.to_string(),
                    RegistryEntry {
                        adapter,
                        record: record.clone(),
                    },
                );
                if state.default.is_none() {
                    state.default = Some(name.to_string());
                }
                None
            }
        }; // Lock released here

        if let Some(adapter) = adapter_to_close {
            adapter.disconnect().await;
            return Err(DbError::duplicate_connection(name));
        }

        info!(connection = %name, "Connection registered");
        Ok(record)
    }

    /// The adapter registered under `name`.
    pub async fn connection(&self, name: &str) -> DbResult<PgAdapter> {
        let state = self.state.read().await;
        state
            .entries
            .get(name)
            .map(|entry| entry.adapter.clone())
            .ok_or_else(|| DbError::connection_not_found(name))
    }

    pub async fn default_connection(&self) -> DbResult<PgAdapter> {
        let state = self.state.read().await;
        state
            .default
            .as_ref()
            .and_then(|name| state.entries.get(name))
            .map(|entry| entry.adapter.clone())
            .ok_or_else(|| DbError::connection_not_found("<default>"))
    }

    pub async fn default_name(&self) -> Option<String> {
        self.state.read().await.default.clone()
    }

    pub async fn set_default(&self, name: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.entries.contains_key(name) {
            return Err(DbError::connection_not_found(name));
        }
        state.default = Some(name.to_string());
        debug!(connection = %name, "Default connection changed");
        Ok(())
    }

    /// A query builder on the default connection.
    pub async fn table(&self, table: &str) -> DbResult<QueryBuilder<PgAdapter>> {
        Ok(self.default_connection().await?.table(table))
    }

    /// A query builder on a named connection.
    pub async fn table_on(
        &self,
        connection: &str,
        table: &str,
    ) -> DbResult<QueryBuilder<PgAdapter>> {
        Ok(self.connection(connection).await?.table(table))
    }

    /// Run a statement on the default connection and report affected rows.
    pub async fn raw(&self, sql: &str, bindings: &[Binding]) -> DbResult<ExecResult> {
        self.default_connection().await?.execute(sql, bindings).await
    }

    /// Run a statement on the default connection and return its rows.
    pub async fn raw_query(&self, sql: &str, bindings: &[Binding]) -> DbResult<Vec<Row>> {
        self.default_connection().await?.query(sql, bindings).await
    }

    /// Run `callback` in a transaction on the default connection.
    pub async fn transaction<F, T>(&self, callback: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut PgTransaction) -> BoxFuture<'t, DbResult<T>> + Send,
        T: Send,
    {
        self.default_connection().await?.transaction(callback).await
    }

    /// Close and forget one connection.
    ///
    /// Closing the default connection leaves the registry without a default
    /// until [`set_default`](Self::set_default) is called.
    pub async fn close_connection(&self, name: &str) -> DbResult<()> {
        let entry = {
            let mut state = self.state.write().await;
            let entry = state
                .entries
                .remove(name)
                .ok_or_else(|| DbError::connection_not_found(name))?;
            if state.default.as_deref() == Some(name) {
                state.default = None;
            }
            entry
        };

        entry.adapter.disconnect().await;
        info!(connection = %name, "Connection closed");
        Ok(())
    }

    /// Close all connections and clear the registry.
    pub async fn close_all(&self) {
        let entries: Vec<(String, RegistryEntry)> = {
            let mut state = self.state.write().await;
            state.default = None;
            state.entries.drain().collect()
        };

        for (name, entry) in entries {
            info!(connection = %name, "Closing connection");
            entry.adapter.disconnect().await;
        }
        info!("All connections closed");
    }

    /// Registered connections, sorted by name. No secrets exposed.
    pub async fn connections(&self) -> Vec<ConnectionRecord> {
        let state = self.state.read().await;
        let mut records: Vec<ConnectionRecord> =
            state.entries.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Pool occupancy per connection.
    pub async fn get_stats(&self) -> BTreeMap<String, PoolStats> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.adapter.stats()))
            .collect()
    }

    /// Ping every connection. A failing connection is reported, not raised.
    pub async fn health_check(&self) -> Vec<HealthReport> {
        // Snapshot adapters so no lock is held across the network round trips.
        let adapters: BTreeMap<String, PgAdapter> = {
            let state = self.state.read().await;
            state
                .entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.adapter.clone()))
                .collect()
        };

        let mut reports = Vec::with_capacity(adapters.len());
        for (name, adapter) in adapters {
            let report = match adapter.ping().await {
                Ok(latency) => HealthReport {
                    name,
                    healthy: true,
                    latency_ms: Some(latency.as_millis() as u64),
                    error: None,
                },
                Err(e) => {
                    warn!(connection = %name, error = %e, "Health check failed");
                    HealthReport {
                        name,
                        healthy: false,
                        latency_ms: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = Registry::new();
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.default_name().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_not_found() {
        let registry = Registry::new();
        let result = registry.connection("nonexistent").await;
        assert!(matches!(result, Err(DbError::ConnectionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_default_connection_missing() {
        let registry = Registry::new();
        assert!(matches!(
            registry.default_connection().await,
            Err(DbError::ConnectionNotFound { .. })
        ));
        assert!(registry.table("users").await.is_err());
    }

    #[tokio::test]
    async fn test_set_default_unknown_fails() {
        let registry = Registry::new();
        assert!(registry.set_default("replica").await.is_err());
    }

    #[tokio::test]
    async fn test_close_unknown_connection_fails() {
        let registry = Registry::new();
        assert!(matches!(
            registry.close_connection("ghost").await,
            Err(DbError::ConnectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_registry_diagnostics() {
        let registry = Registry::new();
        assert!(registry.connections().await.is_empty());
        assert!(registry.get_stats().await.is_empty());
        assert!(registry.health_check().await.is_empty());
        registry.close_all().await;
    }
}
