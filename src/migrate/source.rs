//! Migration units and their discovery.

use crate::error::{DbError, DbResult};
use crate::schema::Schema;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const MIN_PREFIX_WIDTH: usize = 3;
const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// One named, reversible schema change.
///
/// `up` and `down` run inside a transaction that also records the ledger
/// change, so a unit is either fully applied and recorded or neither.
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    fn up<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>>;

    fn down<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>>;
}

/// A migration backed by plain SQL scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlMigration {
    pub fn new(name: &str, up_sql: impl Into<String>, down_sql: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            up_sql: up_sql.into(),
            down_sql,
        }
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            if !self.up_sql.trim().is_empty() {
                schema.raw(&self.up_sql).await?;
            }
            Ok(())
        })
    }

    fn down<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            let sql = self.down_sql.as_deref().ok_or_else(|| {
                DbError::invalid_migration(format!(
                    "Migration '{}' has no {} script",
                    self.name, DOWN_SUFFIX
                ))
            })?;
            if !sql.trim().is_empty() {
                schema.raw(sql).await?;
            }
            Ok(())
        })
    }
}

/// The discovered set of migrations, kept sorted by name.
///
/// Names must start with an all-digit prefix of at least three digits
/// followed by `_`, and every prefix in a source must have the same width,
/// so that name order is numeric order.
#[derive(Clone, Default)]
pub struct MigrationSource {
    migrations: Vec<Arc<dyn Migration>>,
}

impl fmt::Debug for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MigrationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration. Rejects malformed and duplicate names.
    pub fn add<M: Migration + 'static>(&mut self, migration: M) -> DbResult<()> {
        self.insert(Arc::new(migration))
    }

    /// Load `<name>.up.sql` / `<name>.down.sql` pairs from `dir`.
    ///
    /// Files with other extensions are ignored. A down script without a
    /// matching up script is an error.
    pub async fn from_dir(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref();
        let mut scripts: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();

        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            DbError::invalid_migration(format!(
                "Cannot read migrations directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(name) = file_name.strip_suffix(UP_SUFFIX) {
                scripts.entry(name.to_string()).or_default().0 = Some(entry.path());
            } else if let Some(name) = file_name.strip_suffix(DOWN_SUFFIX) {
                scripts.entry(name.to_string()).or_default().1 = Some(entry.path());
            } else {
                debug!(file = %file_name, "Skipping non-migration file");
            }
        }

        let mut source = Self::new();
        for (name, (up_path, down_path)) in scripts {
            let up_path = up_path.ok_or_else(|| {
                DbError::invalid_migration(format!(
                    "Migration '{}' has a {} script but no {} script",
                    name, DOWN_SUFFIX, UP_SUFFIX
                ))
            })?;
            let up_sql = tokio::fs::read_to_string(&up_path).await?;
            let down_sql = match down_path {
                Some(path) => Some(tokio::fs::read_to_string(&path).await?),
                None => None,
            };
            source.add(SqlMigration::new(&name, up_sql, down_sql))?;
        }

        debug!(dir = %dir.display(), count = source.len(), "Discovered migrations");
        Ok(source)
    }

    /// All migrations in name order.
    pub fn migrations(&self) -> &[Arc<dyn Migration>] {
        &self.migrations
    }

    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Migration>> {
        self.position(name)
            .ok()
            .map(|i| Arc::clone(&self.migrations[i]))
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.migrations.binary_search_by(|m| m.name().cmp(name))
    }

    fn insert(&mut self, migration: Arc<dyn Migration>) -> DbResult<()> {
        let width = prefix_width(migration.name())?;
        if let Some(first) = self.migrations.first() {
            let expected = prefix_width(first.name())?;
            if width != expected {
                return Err(DbError::invalid_migration(format!(
                    "Migration '{}' has a {}-digit prefix but '{}' has {} digits; \
                     use one fixed width",
                    migration.name(),
                    width,
                    first.name(),
                    expected
                )));
            }
        }
        match self.position(migration.name()) {
            Ok(_) => Err(DbError::invalid_migration(format!(
                "Duplicate migration name '{}'",
                migration.name()
            ))),
            Err(index) => {
                self.migrations.insert(index, migration);
                Ok(())
            }
        }
    }
}

/// Width of the numeric prefix of a well-formed migration name.
pub fn prefix_width(name: &str) -> DbResult<usize> {
    let width = name.chars().take_while(|c| c.is_ascii_digit()).count();
    let rest = &name[width..];
    let valid = width >= MIN_PREFIX_WIDTH
        && rest.len() > 1
        && rest.starts_with('_')
        && !name.contains(['/', '\\']);
    if !valid {
        return Err(DbError::invalid_migration(format!(
            "Invalid migration name '{}': expected at least {} digits, '_', then a \
             description (e.g. 001_create_users)",
            name, MIN_PREFIX_WIDTH
        )));
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(name: &str) -> SqlMigration {
        SqlMigration::new(name, "SELECT 1", None)
    }

    #[test]
    fn test_prefix_width() {
        assert_eq!(prefix_width("001_init").unwrap(), 3);
        assert_eq!(prefix_width("20240101120000_init").unwrap(), 14);
        assert!(prefix_width("01_init").is_err());
        assert!(prefix_width("001init").is_err());
        assert!(prefix_width("001_").is_err());
        assert!(prefix_width("init").is_err());
    }

    #[test]
    fn test_source_sorts_by_name() {
        let mut source = MigrationSource::new();
        source.add(sql("003_c")).unwrap();
        source.add(sql("001_a")).unwrap();
        source.add(sql("002_b")).unwrap();
        assert_eq!(source.names(), vec!["001_a", "002_b", "003_c"]);
        assert!(source.get("002_b").is_some());
        assert!(source.get("004_d").is_none());
    }

    #[test]
    fn test_source_rejects_duplicates() {
        let mut source = MigrationSource::new();
        source.add(sql("001_a")).unwrap();
        let err = source.add(sql("001_a")).unwrap_err();
        assert!(matches!(err, DbError::InvalidMigration { .. }));
    }

    #[test]
    fn test_source_rejects_mixed_widths() {
        let mut source = MigrationSource::new();
        source.add(sql("002_x")).unwrap();
        assert!(source.add(sql("0010_y")).is_err());
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_debug_lists_names() {
        let mut source = MigrationSource::new();
        source.add(sql("001_a")).unwrap();
        assert_eq!(format!("{:?}", source), "[\"001_a\"]");
    }
}
