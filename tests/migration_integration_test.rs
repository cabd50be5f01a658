//! Migration runner tests against a live PostgreSQL server.
//!
//! Requires TEST_DATABASE_URL; every test returns early without it. Each test
//! uses its own ledger and table names so they can run in parallel.

use futures_util::future::BoxFuture;
use pgforge::migrate::{Migration, MigrationSource, Migrator, SqlMigration};
use pgforge::schema::Schema;
use pgforge::{AdapterConfig, DbError, DbResult, PgAdapter};

async fn connect() -> Option<PgAdapter> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let config = AdapterConfig::from_url(&url).expect("invalid TEST_DATABASE_URL");
    Some(PgAdapter::connect(config).await.expect("failed to connect"))
}

fn suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Code migration creating one table through the schema builder.
struct CreateTable {
    name: String,
    table: String,
}

impl Migration for CreateTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn up<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            schema
                .create_table(&self.table, |t| {
                    t.increments("id");
                    t.string("label").not_nullable();
                    t.add_timestamps();
                })
                .await
        })
    }

    fn down<'a>(&'a self, schema: &'a mut Schema<'_>) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move { schema.drop_table(&self.table).await })
    }
}

fn sql_table(name: &str, table: &str) -> SqlMigration {
    SqlMigration::new(
        name,
        format!("CREATE TABLE {table} (id SERIAL PRIMARY KEY); CREATE INDEX ON {table} (id);"),
        Some(format!("DROP TABLE {table};")),
    )
}

async fn table_exists(adapter: &PgAdapter, table: &str) -> bool {
    let mut adapter = adapter.clone();
    adapter.schema().has_table(table).await.unwrap()
}

async fn cleanup(adapter: &PgAdapter, tables: &[&str]) {
    let mut adapter = adapter.clone();
    let mut schema = adapter.schema();
    for table in tables {
        schema.drop_table_if_exists(table).await.unwrap();
    }
}

#[tokio::test]
async fn test_up_is_idempotent_and_down_restores() {
    let Some(adapter) = connect().await else {
        return;
    };
    let s = suffix();
    let (ledger, x, y) = (format!("ledger_{s}"), format!("x_{s}"), format!("y_{s}"));

    let mut source = MigrationSource::new();
    source.add(sql_table("001_create_x", &x)).unwrap();
    source
        .add(CreateTable {
            name: "002_create_y".into(),
            table: y.clone(),
        })
        .unwrap();
    let migrator = Migrator::new(adapter.clone(), source).with_table(&ledger);

    let first = migrator.up().await.unwrap();
    assert_eq!(first.migrated, vec!["001_create_x", "002_create_y"]);
    assert_eq!(first.batch, Some(1));
    assert!(table_exists(&adapter, &x).await);
    assert!(table_exists(&adapter, &y).await);

    let second = migrator.up().await.unwrap();
    assert!(second.migrated.is_empty());
    assert_eq!(second.batch, None);

    let rolled = migrator.down(1).await.unwrap();
    assert_eq!(rolled.rolled_back, vec!["002_create_y", "001_create_x"]);
    assert_eq!(rolled.batches, vec![1]);
    assert!(!table_exists(&adapter, &x).await);
    assert!(migrator.applied().await.unwrap().is_empty());

    let again = migrator.up().await.unwrap();
    assert_eq!(again.migrated.len(), 2);
    assert_eq!(migrator.applied().await.unwrap().len(), 2);
    assert!(table_exists(&adapter, &y).await);

    let reset = migrator.reset().await.unwrap();
    assert_eq!(reset.rolled_back.len(), 2);
    cleanup(&adapter, &[ledger.as_str()]).await;
}

#[tokio::test]
async fn test_batches_revert_newest_first() {
    let Some(adapter) = connect().await else {
        return;
    };
    let s = suffix();
    let (ledger, x, y) = (format!("ledger_{s}"), format!("x_{s}"), format!("y_{s}"));

    let mut first_source = MigrationSource::new();
    first_source.add(sql_table("001_x", &x)).unwrap();
    let run = Migrator::new(adapter.clone(), first_source)
        .with_table(&ledger)
        .up()
        .await
        .unwrap();
    assert_eq!(run.batch, Some(1));

    let mut source = MigrationSource::new();
    source.add(sql_table("001_x", &x)).unwrap();
    source.add(sql_table("002_y", &y)).unwrap();
    let migrator = Migrator::new(adapter.clone(), source).with_table(&ledger);

    let run = migrator.up().await.unwrap();
    assert_eq!(run.migrated, vec!["002_y"]);
    assert_eq!(run.batch, Some(2));

    let status = migrator.status().await.unwrap();
    assert_eq!(status[0].batch, Some(1));
    assert_eq!(status[1].batch, Some(2));

    let rolled = migrator.down(1).await.unwrap();
    assert_eq!(rolled.rolled_back, vec!["002_y"]);
    assert!(table_exists(&adapter, &x).await);
    assert!(!table_exists(&adapter, &y).await);

    let status = migrator.status().await.unwrap();
    assert!(status[0].ran);
    assert!(!status[1].ran);
    assert_eq!(status[1].batch, None);

    let refreshed = migrator.refresh().await.unwrap();
    assert_eq!(refreshed.reset.rolled_back, vec!["001_x"]);
    assert_eq!(refreshed.migrated.migrated, vec!["001_x", "002_y"]);
    assert_eq!(refreshed.migrated.batch, Some(1));

    migrator.reset().await.unwrap();
    cleanup(&adapter, &[ledger.as_str()]).await;
}

#[tokio::test]
async fn test_failed_unit_stops_batch_and_is_not_recorded() {
    let Some(adapter) = connect().await else {
        return;
    };
    let s = suffix();
    let (ledger, x) = (format!("ledger_{s}"), format!("x_{s}"));

    let mut source = MigrationSource::new();
    source.add(sql_table("001_ok", &x)).unwrap();
    source
        .add(SqlMigration::new("002_broken", "CREATE TABLE (", None))
        .unwrap();
    source.add(sql_table("003_never", &format!("z_{s}"))).unwrap();
    let migrator = Migrator::new(adapter.clone(), source).with_table(&ledger);

    let err = migrator.up().await.unwrap_err();
    match err {
        DbError::Migration { name, .. } => assert_eq!(name, "002_broken"),
        other => panic!("unexpected error: {other}"),
    }

    let applied: Vec<String> = migrator
        .applied()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(applied, vec!["001_ok"]);
    assert!(!table_exists(&adapter, &format!("z_{s}")).await);

    cleanup(&adapter, &[x.as_str(), ledger.as_str()]).await;
}

#[tokio::test]
async fn test_down_with_unknown_ledger_entry_touches_nothing() {
    let Some(adapter) = connect().await else {
        return;
    };
    let s = suffix();
    let (ledger, x) = (format!("ledger_{s}"), format!("x_{s}"));

    let mut source = MigrationSource::new();
    source.add(sql_table("001_x", &x)).unwrap();
    Migrator::new(adapter.clone(), source)
        .with_table(&ledger)
        .up()
        .await
        .unwrap();

    let forgetful = Migrator::new(adapter.clone(), MigrationSource::new()).with_table(&ledger);
    let err = forgetful.down(1).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidMigration { .. }));
    assert_eq!(forgetful.applied().await.unwrap().len(), 1);
    assert!(table_exists(&adapter, &x).await);

    cleanup(&adapter, &[x.as_str(), ledger.as_str()]).await;
}
