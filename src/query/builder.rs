//! Fluent query builder.
//!
//! A [`QueryBuilder`] pairs a [`QueryState`] with an executor handle. Chain
//! methods take and return the builder by value; terminal methods consume
//! it, so a builder can never be executed twice or shared mid-chain.
//!
//! ```ignore
//! let adults = registry
//!     .table("users")
//!     .await?
//!     .select(["id", "name"])
//!     .where_op("age", ">", 18)
//!     .where_eq("status", "active")
//!     .order_by("name", "asc")
//!     .paginate(2, 10)
//!     .await?;
//! ```

use crate::db::Executor;
use crate::error::{DbError, DbResult};
use crate::models::{Binding, ExecResult, Page, Pagination, Row};
use crate::query::compiler::{self, CompiledQuery};
use crate::query::state::{
    Condition, Conjunction, Direction, Having, Join, JoinKind, Operation, Operator, Order,
    Predicate, QueryState, WriteValues,
};
use serde_json::Value as JsonValue;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct QueryBuilder<E = ()> {
    conn: E,
    state: QueryState,
}

impl QueryBuilder<()> {
    /// An unbound builder. It can compile SQL but not run it.
    pub fn table(name: &str) -> Self {
        Self::on((), name)
    }
}

impl<E> QueryBuilder<E> {
    /// A builder for `table` that runs on `conn`.
    pub fn on(conn: E, table: &str) -> Self {
        Self {
            conn,
            state: QueryState {
                table: Some(table.to_string()),
                ..Default::default()
            },
        }
    }

    /// Move the accumulated state onto another executor.
    pub fn bind_to<X>(self, conn: X) -> QueryBuilder<X> {
        QueryBuilder {
            conn,
            state: self.state,
        }
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    // =========================================================================
    // Projection and source
    // =========================================================================

    /// Read the given columns. With no columns the projection is `*`.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.operation = Some(Operation::Select);
        self.state.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.state.table = Some(table.to_string());
        self
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    /// `column = ?`
    pub fn where_eq(self, column: &str, value: impl Into<Binding>) -> Self {
        self.push_compare(Conjunction::And, column, Ok(Operator::Eq), value.into())
    }

    /// `column <operator> ?`
    pub fn where_op(self, column: &str, operator: &str, value: impl Into<Binding>) -> Self {
        self.push_compare(Conjunction::And, column, operator.parse(), value.into())
    }

    /// AND-conjoined equalities, in iteration order.
    pub fn where_all<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Binding>,
    {
        pairs
            .into_iter()
            .fold(self, |builder, (column, value)| {
                builder.where_eq(column.as_ref(), value)
            })
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Binding>) -> Self {
        self.push_compare(Conjunction::Or, column, Ok(Operator::Eq), value.into())
    }

    pub fn or_where_op(self, column: &str, operator: &str, value: impl Into<Binding>) -> Self {
        self.push_compare(Conjunction::Or, column, operator.parse(), value.into())
    }

    /// `column IN (?, ...)`. An empty list compiles to `1 = 0`.
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Binding>,
    {
        self.push_in(Conjunction::And, column, values, false)
    }

    /// `column NOT IN (?, ...)`. An empty list compiles to `1 = 1`.
    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Binding>,
    {
        self.push_in(Conjunction::And, column, values, true)
    }

    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Binding>,
    {
        self.push_in(Conjunction::Or, column, values, false)
    }

    pub fn where_between(
        self,
        column: &str,
        low: impl Into<Binding>,
        high: impl Into<Binding>,
    ) -> Self {
        self.push_predicate(
            Conjunction::And,
            Condition::Between {
                column: column.to_string(),
                low: low.into(),
                high: high.into(),
            },
        )
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push_predicate(
            Conjunction::And,
            Condition::Null {
                column: column.to_string(),
                negated: false,
            },
        )
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push_predicate(
            Conjunction::And,
            Condition::Null {
                column: column.to_string(),
                negated: true,
            },
        )
    }

    /// `column LIKE ?`. The caller supplies any `%` wildcards.
    pub fn where_like(self, column: &str, pattern: impl Into<String>) -> Self {
        self.push_compare(
            Conjunction::And,
            column,
            Ok(Operator::Like),
            Binding::Text(pattern.into()),
        )
    }

    pub fn or_where_like(self, column: &str, pattern: impl Into<String>) -> Self {
        self.push_compare(
            Conjunction::Or,
            column,
            Ok(Operator::Like),
            Binding::Text(pattern.into()),
        )
    }

    // =========================================================================
    // Joins
    // =========================================================================

    /// `INNER JOIN table ON left = right`
    pub fn join(self, table: &str, left: &str, right: &str) -> Self {
        self.push_join(JoinKind::Inner, table, left, Ok(Operator::Eq), right)
    }

    pub fn join_op(self, table: &str, left: &str, operator: &str, right: &str) -> Self {
        self.push_join(JoinKind::Inner, table, left, operator.parse(), right)
    }

    pub fn left_join(self, table: &str, left: &str, right: &str) -> Self {
        self.push_join(JoinKind::Left, table, left, Ok(Operator::Eq), right)
    }

    pub fn left_join_op(self, table: &str, left: &str, operator: &str, right: &str) -> Self {
        self.push_join(JoinKind::Left, table, left, operator.parse(), right)
    }

    pub fn right_join(self, table: &str, left: &str, right: &str) -> Self {
        self.push_join(JoinKind::Right, table, left, Ok(Operator::Eq), right)
    }

    pub fn right_join_op(self, table: &str, left: &str, operator: &str, right: &str) -> Self {
        self.push_join(JoinKind::Right, table, left, operator.parse(), right)
    }

    // =========================================================================
    // Grouping, ordering, paging
    // =========================================================================

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .group_columns
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// `HAVING column <operator> ?`. Multiple calls are AND-conjoined.
    pub fn having(mut self, column: &str, operator: &str, value: impl Into<Binding>) -> Self {
        match operator.parse() {
            Ok(operator) => self.state.having.push(Having {
                column: column.to_string(),
                operator,
                value: value.into(),
            }),
            Err(e) => self.state.errors.push(e.to_string()),
        }
        self
    }

    /// Append a sort key. `direction` is `asc` or `desc` in any case.
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        match direction.parse::<Direction>() {
            Ok(direction) => self.state.orders.push(Order {
                column: column.to_string(),
                direction,
            }),
            Err(e) => self.state.errors.push(e.to_string()),
        }
        self
    }

    /// Ascending sort key, the default direction.
    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, "asc")
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, "desc")
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.state.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.state.offset = Some(n);
        self
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one JSON object or an array of objects.
    ///
    /// The first row's key order fixes the column list; every other row must
    /// have exactly the same keys.
    pub fn insert(mut self, data: JsonValue) -> Self {
        self.state.operation = Some(Operation::Insert);
        match insert_values(data) {
            Ok(values) => self.state.write_values = Some(values),
            Err(message) => self.state.errors.push(message),
        }
        self
    }

    /// `SET column = ?` for each key of a JSON object, in key order.
    pub fn update(mut self, data: JsonValue) -> Self {
        self.state.operation = Some(Operation::Update);
        match data {
            JsonValue::Object(map) if !map.is_empty() => {
                let assignments = map
                    .into_iter()
                    .map(|(column, value)| (column, Binding::from(value)))
                    .collect();
                self.state.write_values = Some(WriteValues::Update(assignments));
            }
            JsonValue::Object(_) => self.state.errors.push("update needs at least one column".into()),
            other => self.state.errors.push(format!(
                "update expects a JSON object, got {}",
                json_kind(&other)
            )),
        }
        self
    }

    pub fn delete(mut self) -> Self {
        self.state.operation = Some(Operation::Delete);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .returning
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Compile without touching the database.
    pub fn to_sql(&self) -> DbResult<CompiledQuery> {
        compiler::compile(&self.state)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn push_predicate(mut self, conjunction: Conjunction, condition: Condition) -> Self {
        self.state.predicates.push(Predicate {
            conjunction,
            condition,
        });
        self
    }

    fn push_compare(
        mut self,
        conjunction: Conjunction,
        column: &str,
        operator: DbResult<Operator>,
        value: Binding,
    ) -> Self {
        match operator {
            Ok(operator) => self.push_predicate(
                conjunction,
                Condition::Compare {
                    column: column.to_string(),
                    operator,
                    value,
                },
            ),
            Err(e) => {
                self.state.errors.push(e.to_string());
                self
            }
        }
    }

    fn push_in<I, V>(self, conjunction: Conjunction, column: &str, values: I, negated: bool) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Binding>,
    {
        self.push_predicate(
            conjunction,
            Condition::In {
                column: column.to_string(),
                values: values.into_iter().map(Into::into).collect(),
                negated,
            },
        )
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: &str,
        left: &str,
        operator: DbResult<Operator>,
        right: &str,
    ) -> Self {
        match operator {
            Ok(operator) => self.state.joins.push(Join {
                kind,
                table: table.to_string(),
                left: left.to_string(),
                operator,
                right: right.to_string(),
            }),
            Err(e) => self.state.errors.push(e.to_string()),
        }
        self
    }

    /// Default a bare builder to SELECT; refuse if it already holds a write.
    fn ensure_select(&mut self, terminal: &str) -> DbResult<()> {
        match self.state.operation {
            None => {
                self.state.operation = Some(Operation::Select);
                Ok(())
            }
            Some(Operation::Select) => Ok(()),
            Some(other) => Err(DbError::build(format!(
                "{}() needs a SELECT, builder holds {:?}",
                terminal, other
            ))),
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

impl<E: Executor> QueryBuilder<E> {
    /// Compile and run. SELECT and `RETURNING` statements yield rows; other
    /// writes yield only the affected-row count.
    pub async fn execute(mut self) -> DbResult<ExecResult> {
        let compiled = self.to_sql()?;
        let returns_rows = self.state.operation == Some(Operation::Select)
            || !self.state.returning.is_empty();

        debug!(
            table = ?self.state.table,
            operation = ?self.state.operation,
            bindings = compiled.bindings.len(),
            "Executing builder statement"
        );

        if returns_rows {
            let rows = self.conn.query(&compiled.sql, &compiled.bindings).await?;
            Ok(ExecResult::from_rows(rows))
        } else {
            self.conn.execute(&compiled.sql, &compiled.bindings).await
        }
    }

    /// Run a SELECT and return its rows.
    pub async fn get(mut self) -> DbResult<Vec<Row>> {
        self.ensure_select("get")?;
        Ok(self.execute().await?.rows)
    }

    /// The first matching row, or `None` when nothing matches.
    pub async fn first(mut self) -> DbResult<Option<Row>> {
        self.ensure_select("first")?;
        self.state.limit = Some(1);
        Ok(self.execute().await?.rows.into_iter().next())
    }

    /// `COUNT(*)` over the current predicates.
    pub async fn count(self) -> DbResult<u64> {
        self.count_column("*").await
    }

    pub async fn count_column(mut self, column: &str) -> DbResult<u64> {
        let compiled = compiler::compile_count(&self.state, column)?;
        let rows = self.conn.query(&compiled.sql, &compiled.bindings).await?;
        Ok(read_aggregate(&rows))
    }

    pub async fn exists(mut self) -> DbResult<bool> {
        let compiled = compiler::compile_exists(&self.state)?;
        let rows = self.conn.query(&compiled.sql, &compiled.bindings).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("present"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false))
    }

    /// Values of a single column, in row order.
    pub async fn pluck(mut self, column: &str) -> DbResult<Vec<JsonValue>> {
        self.ensure_select("pluck")?;
        self.state.columns = vec![column.to_string()];
        let rows = self.execute().await?.rows;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().map(|(_, v)| v).unwrap_or(JsonValue::Null))
            .collect())
    }

    /// One page of results plus totals.
    ///
    /// The total comes from a COUNT over a snapshot of the current state
    /// without ORDER BY, LIMIT or OFFSET; the page query then applies
    /// `LIMIT per_page OFFSET (page - 1) * per_page`. `page` below 1 is
    /// treated as 1.
    pub async fn paginate(mut self, page: u64, per_page: u64) -> DbResult<Page> {
        if per_page == 0 {
            return Err(DbError::build("paginate() needs per_page greater than 0"));
        }
        self.ensure_select("paginate")?;
        let page = page.max(1);
        let offset = Pagination::offset_for(page, per_page)?;

        let snapshot = self.state.clone();
        let count = compiler::compile_count(&snapshot, "*")?;
        let rows = self.conn.query(&count.sql, &count.bindings).await?;
        let pagination = Pagination::compute(read_aggregate(&rows), page, per_page)?;

        self.state.limit = Some(per_page);
        self.state.offset = Some(offset);
        let data = self.execute().await?.rows;

        Ok(Page { data, pagination })
    }
}

fn read_aggregate(rows: &[Row]) -> u64 {
    rows.first()
        .and_then(|row| row.get("aggregate"))
        .and_then(JsonValue::as_u64)
        .unwrap_or(0)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn insert_values(data: JsonValue) -> Result<WriteValues, String> {
    let rows = match data {
        JsonValue::Object(map) => vec![map],
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Object(map) => Ok(map),
                other => Err(format!(
                    "insert row {} must be an object, got {}",
                    i,
                    json_kind(&other)
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(format!(
                "insert expects an object or an array of objects, got {}",
                json_kind(&other)
            ));
        }
    };

    let Some(first) = rows.first() else {
        return Err("insert needs at least one row".to_string());
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    if columns.is_empty() {
        return Err("insert row has no columns".to_string());
    }

    for (i, row) in rows.iter().enumerate().skip(1) {
        if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
            return Err(format!(
                "insert row {} has a different column set than row 0",
                i
            ));
        }
    }

    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map(Binding::from).unwrap_or(Binding::Null))
                .collect()
        })
        .collect();

    Ok(WriteValues::Insert {
        columns,
        rows: values,
    })
}
