//! Statement execution.
//!
//! [`Executor`] is the seam between the builders and the database: anything
//! that can run a neutral-placeholder statement with positional bindings.
//! The pooled adapter and a scoped transaction both implement it, so a
//! `QueryBuilder` or `Schema` runs unchanged inside or outside a transaction.
//!
//! The free functions below do the actual work on a single borrowed
//! connection. They translate placeholders, bind, run under a timeout and
//! decode.

use crate::db::params::bind_all;
use crate::db::placeholder;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{Binding, Dialect, ExecResult, Row};
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use sqlx::postgres::{PgQueryResult, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::{Either, PgConnection, Statement as _, TypeInfo as _};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Something that can run SQL with neutral `?` placeholders.
///
/// Implementations translate placeholders to the dialect's form before the
/// statement reaches the driver.
pub trait Executor: Send {
    /// Run a statement and return its rows.
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<Vec<Row>>>;

    /// Run a statement and return its affected-row count plus any rows it
    /// returned (`RETURNING`, or a plain `SELECT`).
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<ExecResult>>;

    fn dialect(&self) -> Dialect;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn query<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<Vec<Row>>> {
        (**self).query(sql, bindings)
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        bindings: &'a [Binding],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        (**self).execute(sql, bindings)
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }
}

// =============================================================================
// Connection-Level Helpers
// =============================================================================

/// Types a text binding already satisfies without a cast.
const TEXT_TYPES: &[&str] = &["TEXT", "VARCHAR", "BPCHAR", "CHAR", "NAME", "UNKNOWN"];

fn timeout_error(operation: &str, deadline: Duration) -> DbError {
    DbError::timeout(operation, deadline)
}

/// Render a server type name as a cast target.
fn cast_target(type_name: &str) -> String {
    let base = type_name.trim_end_matches("[]");
    let dims = &type_name[base.len()..];
    if !base.is_empty() && base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        type_name.to_string()
    } else {
        format!("\"{}\"{}", base.replace('"', "\"\""), dims)
    }
}

/// The type a text value can be cast to for this parameter. Domains cast to
/// their base type and are then assigned implicitly.
fn cast_type(info: &PgTypeInfo) -> Option<&str> {
    match info.kind() {
        PgTypeKind::Domain(base) => cast_type(base),
        PgTypeKind::Pseudo | PgTypeKind::Composite(_) => None,
        _ => Some(info.name()),
    }
}

/// Pick an explicit cast for every text binding whose position the server
/// resolves to a non-text type. Other bindings carry their own type.
fn text_casts(bindings: &[Binding], inferred: &[PgTypeInfo]) -> Vec<Option<String>> {
    bindings
        .iter()
        .enumerate()
        .map(|(idx, binding)| {
            let target = cast_type(inferred.get(idx)?)?;
            if !matches!(binding, Binding::Text(_)) || TEXT_TYPES.contains(&target) {
                return None;
            }
            debug!(
                position = idx + 1,
                binding = binding.type_name(),
                cast = %target,
                "Casting text binding"
            );
            Some(cast_target(target))
        })
        .collect()
}

/// Translate placeholders for the extended protocol.
///
/// Every parameter is sent in binary form, so a text value aimed at e.g. a
/// `uuid` or `date` position would be misread. When text bindings are
/// present the statement is described first and those placeholders get an
/// explicit cast to the type the server infers, which then parses the text
/// with its own input rules. The description is prepared under its own
/// statement-cache key so its inferred parameter types never leak into the
/// statement that is executed.
async fn prepare_sql(
    conn: &mut PgConnection,
    sql: &str,
    bindings: &[Binding],
) -> DbResult<String> {
    let translated = placeholder::translate(sql, bindings.len())?;
    if !bindings.iter().any(|b| matches!(b, Binding::Text(_))) {
        return Ok(translated);
    }

    let describe_sql = format!("{}\n-- parameter types", translated);
    let statement = {
        use sqlx::Executor as _;
        (&mut *conn).prepare(describe_sql.as_str()).await?
    };
    let casts = match statement.parameters() {
        Some(Either::Left(inferred)) => text_casts(bindings, inferred),
        _ => return Ok(translated),
    };
    if casts.iter().all(Option::is_none) {
        return Ok(translated);
    }
    placeholder::translate_with_casts(sql, &casts)
}

/// Collect the affected count and every returned row from one statement.
async fn drain(
    mut stream: BoxStream<'_, Result<Either<PgQueryResult, PgRow>, sqlx::Error>>,
) -> DbResult<ExecResult> {
    let mut result = ExecResult::default();
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => result.row_count += done.rows_affected(),
            Either::Right(row) => result.rows.push(row.to_json_map()?),
        }
    }
    Ok(result)
}

/// Run a statement on one connection and decode every row.
pub(crate) async fn fetch_rows(
    conn: &mut PgConnection,
    sql: &str,
    bindings: &[Binding],
    query_timeout: Duration,
) -> DbResult<Vec<Row>> {
    let result = timeout(query_timeout, async {
        let translated = prepare_sql(conn, sql, bindings).await?;

        debug!(
            sql = %translated,
            params = bindings.len(),
            timeout_secs = query_timeout.as_secs(),
            "Executing query"
        );

        // Without bindings, send the text as-is over the simple protocol so
        // multi-statement scripts work.
        let rows = if bindings.is_empty() {
            use sqlx::Executor as _;
            (&mut *conn).fetch_all(translated.as_str()).await?
        } else {
            bind_all(&translated, bindings).fetch_all(&mut *conn).await?
        };
        rows.iter().map(|r| r.to_json_map()).collect::<DbResult<Vec<_>>>()
    })
    .await;

    match result {
        Ok(rows) => rows,
        Err(_) => Err(timeout_error("query execution", query_timeout)),
    }
}

/// Run a statement on one connection and report affected and returned rows.
pub(crate) async fn execute_write(
    conn: &mut PgConnection,
    sql: &str,
    bindings: &[Binding],
    query_timeout: Duration,
) -> DbResult<ExecResult> {
    let result = timeout(query_timeout, async {
        let translated = prepare_sql(conn, sql, bindings).await?;

        debug!(
            sql = %translated,
            params = bindings.len(),
            timeout_secs = query_timeout.as_secs(),
            "Executing write operation"
        );

        use sqlx::Executor as _;
        if bindings.is_empty() {
            drain((&mut *conn).fetch_many(translated.as_str())).await
        } else {
            drain((&mut *conn).fetch_many(bind_all(&translated, bindings))).await
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(timeout_error("write operation", query_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records statements instead of running them.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<(String, usize)>,
    }

    impl Executor for Recorder {
        fn query<'a>(
            &'a mut self,
            sql: &'a str,
            bindings: &'a [Binding],
        ) -> BoxFuture<'a, DbResult<Vec<Row>>> {
            self.seen.push((sql.to_string(), bindings.len()));
            Box::pin(async { Ok(Vec::new()) })
        }

        fn execute<'a>(
            &'a mut self,
            sql: &'a str,
            bindings: &'a [Binding],
        ) -> BoxFuture<'a, DbResult<ExecResult>> {
            self.seen.push((sql.to_string(), bindings.len()));
            Box::pin(async { Ok(ExecResult::affected(1)) })
        }

        fn dialect(&self) -> Dialect {
            Dialect::PostgreSQL
        }
    }

    #[tokio::test]
    async fn test_mut_ref_forwards_to_inner() {
        let mut recorder = Recorder::default();
        {
            let mut by_ref = &mut recorder;
            by_ref.execute("DELETE FROM t", &[]).await.unwrap();
            let dynamic: &mut dyn Executor = &mut by_ref;
            dynamic.query("SELECT ?", &[Binding::Int(1)]).await.unwrap();
            assert_eq!(dynamic.dialect(), Dialect::PostgreSQL);
        }
        assert_eq!(
            recorder.seen,
            vec![("DELETE FROM t".to_string(), 0), ("SELECT ?".to_string(), 1)]
        );
    }

    #[test]
    fn test_timeout_error_keeps_operation() {
        let err = timeout_error("query execution", Duration::from_secs(2));
        assert!(matches!(err, DbError::Timeout { .. }));
    }

    #[test]
    fn test_text_casts_follow_inferred_types() {
        use sqlx::{Postgres, Type};

        let inferred = vec![
            <uuid::Uuid as Type<Postgres>>::type_info(),
            <String as Type<Postgres>>::type_info(),
            <chrono::NaiveDate as Type<Postgres>>::type_info(),
            <i64 as Type<Postgres>>::type_info(),
        ];
        let bindings = vec![
            Binding::from("7f1c0a52-5b36-4f3e-9a55-1f0e2d9c4b11"),
            Binding::from("plain"),
            Binding::from("2024-01-02"),
            Binding::Int(3),
        ];

        assert_eq!(
            text_casts(&bindings, &inferred),
            vec![Some("UUID".to_string()), None, Some("DATE".to_string()), None]
        );
    }

    #[test]
    fn test_cast_target_quotes_odd_names() {
        assert_eq!(cast_target("NUMERIC"), "NUMERIC");
        assert_eq!(cast_target("TEXT[]"), "TEXT[]");
        assert_eq!(cast_target("Mood Kind"), "\"Mood Kind\"");
        assert_eq!(cast_target("odd\"name[]"), "\"odd\"\"name\"[]");
    }
}
