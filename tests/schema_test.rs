//! DDL compilation tests for the table and schema builders.

use futures_util::future::BoxFuture;
use pgforge::models::{Binding, Dialect, ExecResult, Row};
use pgforge::schema::{Schema, TableBuilder};
use pgforge::{DbError, DbResult, Executor};

const PG: Dialect = Dialect::PostgreSQL;

/// Records statements instead of running them.
#[derive(Default)]
struct Recorder {
    statements: Vec<String>,
    fail_on: Option<String>,
}

impl Executor for Recorder {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        _bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<Vec<Row>>> {
        self.statements.push(sql.to_string());
        Box::pin(async { Ok(Vec::new()) })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        _bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        let fail = self
            .fail_on
            .as_deref()
            .is_some_and(|needle| sql.contains(needle));
        self.statements.push(sql.to_string());
        Box::pin(async move {
            if fail {
                Err(DbError::build("simulated failure"))
            } else {
                Ok(ExecResult::affected(0))
            }
        })
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }
}

// =========================================================================
// CREATE TABLE
// =========================================================================

#[test]
fn test_schema_round_trip_single_statement() {
    let mut t = TableBuilder::create("comments");
    t.big_increments("id");
    t.string("author").nullable();
    t.string("body").nullable();
    t.big_integer("post_id")
        .references("id")
        .on("posts")
        .on_delete("cascade")
        .on_update("restrict");

    let sql = t.to_sql(PG).unwrap();
    assert!(sql.starts_with("CREATE TABLE comments ("));
    assert_eq!(sql.matches("CREATE TABLE").count(), 1);
    assert_eq!(sql.matches("PRIMARY KEY").count(), 1);
    assert_eq!(sql.matches("FOREIGN KEY").count(), 1);
    assert!(sql.find("PRIMARY KEY (id)").unwrap() < sql.find("FOREIGN KEY").unwrap());
    assert!(sql.contains(
        "FOREIGN KEY (post_id) REFERENCES posts (id) ON DELETE CASCADE ON UPDATE RESTRICT"
    ));
    assert!(sql.contains("author VARCHAR(255),"));
}

#[test]
fn test_every_column_factory() {
    let mut t = TableBuilder::create("kitchen_sink");
    t.increments("id");
    t.string_with_length("code", 12);
    t.text("notes");
    t.integer("qty");
    t.decimal("price", 10, 2);
    t.float("ratio");
    t.boolean("active").default(true);
    t.date("day");
    t.timestamp("seen_at");
    t.json("meta");
    t.jsonb("tags");
    t.uuid("token").unique();
    t.enumeration("size", ["s", "m", "l"]);

    let sql = t.to_sql(PG).unwrap();
    for fragment in [
        "id SERIAL",
        "code VARCHAR(12)",
        "notes TEXT",
        "qty INTEGER",
        "price NUMERIC(10, 2)",
        "ratio DOUBLE PRECISION",
        "active BOOLEAN DEFAULT TRUE",
        "day DATE",
        "seen_at TIMESTAMP",
        "meta JSON",
        "tags JSONB",
        "token UUID UNIQUE",
        "size VARCHAR(255) CHECK (size IN ('s', 'm', 'l'))",
    ] {
        assert!(sql.contains(fragment), "missing {fragment} in {sql}");
    }
}

#[test]
fn test_check_and_unsigned() {
    let mut t = TableBuilder::create("accounts");
    t.integer("balance").unsigned().check("balance < 1000000");
    assert_eq!(
        t.to_sql(PG).unwrap(),
        "CREATE TABLE accounts (balance INTEGER CHECK (balance >= 0) CHECK (balance < 1000000))"
    );
}

// =========================================================================
// ALTER TABLE
// =========================================================================

#[test]
fn test_alter_emits_one_statement_per_column() {
    let mut t = TableBuilder::alter("users");
    t.string("first_name");
    t.string("last_name");
    t.add_index(["last_name", "first_name"], Some("users_name_lookup"));

    assert_eq!(
        t.to_sql_array(PG).unwrap(),
        vec![
            "ALTER TABLE users ADD COLUMN first_name VARCHAR(255)",
            "ALTER TABLE users ADD COLUMN last_name VARCHAR(255)",
            "CREATE INDEX users_name_lookup ON users (last_name, first_name)",
        ]
    );
}

#[tokio::test]
async fn test_alter_stops_at_first_failure() {
    let mut recorder = Recorder {
        fail_on: Some("b_col".into()),
        ..Default::default()
    };
    let mut schema = Schema::new(&mut recorder);
    let result = schema
        .alter_table("t", |t| {
            t.text("a_col");
            t.text("b_col");
            t.text("c_col");
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        recorder.statements,
        vec![
            "ALTER TABLE t ADD COLUMN a_col TEXT",
            "ALTER TABLE t ADD COLUMN b_col TEXT",
        ]
    );
}

// =========================================================================
// Schema operations
// =========================================================================

#[tokio::test]
async fn test_create_table_with_unique_index() {
    let mut recorder = Recorder::default();
    let mut schema = Schema::new(&mut recorder);
    schema
        .create_table_if_not_exists("memberships", |t| {
            t.increments("id");
            t.integer("user_id").not_nullable();
            t.integer("team_id").not_nullable();
            t.add_unique(["user_id", "team_id"], None);
            t.add_timestamps();
        })
        .await
        .unwrap();

    assert_eq!(recorder.statements.len(), 2);
    assert!(recorder.statements[0].starts_with("CREATE TABLE IF NOT EXISTS memberships ("));
    assert_eq!(
        recorder.statements[1],
        "CREATE UNIQUE INDEX memberships_user_id_team_id_unique ON memberships (user_id, team_id)"
    );
}

#[tokio::test]
async fn test_has_table_without_count_row_is_an_error() {
    let mut recorder = Recorder::default();
    let mut schema = Schema::new(&mut recorder);
    assert!(schema.has_table("users").await.is_err());
}
