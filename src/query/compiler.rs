//! Pure SQL compilation of a [`QueryState`].
//!
//! Every function here is deterministic and performs no I/O. Each `?` is
//! pushed together with its binding, so the placeholder count and order
//! always match the bindings list.

use crate::error::{DbError, DbResult};
use crate::models::Binding;
use crate::query::state::{Condition, Operation, QueryState, WriteValues};
use serde::Serialize;

/// SQL with neutral `?` placeholders plus bindings in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Binding>,
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    bindings: Vec<Binding>,
}

impl SqlWriter {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: &Binding) {
        self.sql.push('?');
        self.bindings.push(value.clone());
    }

    fn bind_list(&mut self, values: &[Binding]) {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value);
        }
    }

    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

/// Compile the statement described by `state`.
pub fn compile(state: &QueryState) -> DbResult<CompiledQuery> {
    state.check()?;
    let operation = state.operation.ok_or_else(|| {
        DbError::build("No operation set: call select(), insert(), update() or delete() first")
    })?;

    let mut w = SqlWriter::default();
    match operation {
        Operation::Select => write_select(&mut w, state)?,
        Operation::Insert => write_insert(&mut w, state)?,
        Operation::Update => write_update(&mut w, state)?,
        Operation::Delete => write_delete(&mut w, state)?,
    }
    Ok(w.finish())
}

/// `SELECT COUNT(column) AS aggregate ...` ignoring order, limit and offset.
///
/// With GROUP BY the grouped query becomes a derived table and its rows are
/// counted.
pub fn compile_count(state: &QueryState, column: &str) -> DbResult<CompiledQuery> {
    let inner = read_snapshot(state)?;
    let mut w = SqlWriter::default();

    if inner.group_columns.is_empty() {
        w.push("SELECT COUNT(");
        w.push(column);
        w.push(") AS aggregate FROM ");
        w.push(inner.table_name()?);
        write_joins(&mut w, &inner);
        write_where(&mut w, &inner);
        write_having(&mut w, &inner);
    } else {
        w.push("SELECT COUNT(*) AS aggregate FROM (");
        write_select(&mut w, &inner)?;
        w.push(") AS grouped");
    }
    Ok(w.finish())
}

/// `SELECT EXISTS (SELECT 1 ...) AS present`.
pub fn compile_exists(state: &QueryState) -> DbResult<CompiledQuery> {
    let mut inner = read_snapshot(state)?;
    inner.columns = vec!["1".to_string()];

    let mut w = SqlWriter::default();
    w.push("SELECT EXISTS (");
    write_select(&mut w, &inner)?;
    w.push(") AS present");
    Ok(w.finish())
}

/// Copy of a read query without ordering or paging.
fn read_snapshot(state: &QueryState) -> DbResult<QueryState> {
    state.check()?;
    match state.operation {
        None | Some(Operation::Select) => {}
        Some(other) => {
            return Err(DbError::build(format!(
                "Aggregate reads need a SELECT, builder holds {:?}",
                other
            )));
        }
    }

    let mut snapshot = state.clone();
    snapshot.orders.clear();
    snapshot.limit = None;
    snapshot.offset = None;
    Ok(snapshot)
}

// =============================================================================
// Statements
// =============================================================================

fn write_select(w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
    w.push("SELECT ");
    if state.columns.is_empty() {
        w.push("*");
    } else {
        w.push(&state.columns.join(", "));
    }
    w.push(" FROM ");
    w.push(state.table_name()?);

    write_joins(w, state);
    write_where(w, state);

    if !state.group_columns.is_empty() {
        w.push(" GROUP BY ");
        w.push(&state.group_columns.join(", "));
    }
    write_having(w, state);

    if !state.orders.is_empty() {
        let orders: Vec<String> = state
            .orders
            .iter()
            .map(|o| format!("{} {}", o.column, o.direction.as_sql()))
            .collect();
        w.push(" ORDER BY ");
        w.push(&orders.join(", "));
    }
    if let Some(limit) = state.limit {
        w.push(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = state.offset {
        w.push(&format!(" OFFSET {}", offset));
    }
    Ok(())
}

fn write_insert(w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
    let table = state.table_name()?;
    let Some(WriteValues::Insert { columns, rows }) = &state.write_values else {
        return Err(DbError::build("INSERT without values"));
    };

    w.push("INSERT INTO ");
    w.push(table);
    w.push(" (");
    w.push(&columns.join(", "));
    w.push(") VALUES ");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push("(");
        w.bind_list(row);
        w.push(")");
    }
    write_returning(w, state);
    Ok(())
}

fn write_update(w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
    let table = state.table_name()?;
    let Some(WriteValues::Update(assignments)) = &state.write_values else {
        return Err(DbError::build("UPDATE without values"));
    };

    w.push("UPDATE ");
    w.push(table);
    w.push(" SET ");
    for (i, (column, value)) in assignments.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push(column);
        w.push(" = ");
        w.bind(value);
    }
    write_where(w, state);
    write_returning(w, state);
    Ok(())
}

fn write_delete(w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
    w.push("DELETE FROM ");
    w.push(state.table_name()?);
    write_where(w, state);
    write_returning(w, state);
    Ok(())
}

// =============================================================================
// Clauses
// =============================================================================

fn write_joins(w: &mut SqlWriter, state: &QueryState) {
    for join in &state.joins {
        w.push(&format!(
            " {} {} ON {} {} {}",
            join.kind.as_sql(),
            join.table,
            join.left,
            join.operator.as_sql(),
            join.right
        ));
    }
}

fn write_where(w: &mut SqlWriter, state: &QueryState) {
    if state.predicates.is_empty() {
        return;
    }

    w.push(" WHERE ");
    for (i, predicate) in state.predicates.iter().enumerate() {
        if i > 0 {
            w.push(" ");
            w.push(predicate.conjunction.as_sql());
            w.push(" ");
        }
        write_condition(w, &predicate.condition);
    }
}

fn write_condition(w: &mut SqlWriter, condition: &Condition) {
    match condition {
        Condition::Compare {
            column,
            operator,
            value,
        } => {
            w.push(column);
            w.push(" ");
            w.push(operator.as_sql());
            w.push(" ");
            w.bind(value);
        }
        // An empty list matches nothing (IN) or everything (NOT IN).
        Condition::In {
            values, negated, ..
        } if values.is_empty() => {
            w.push(if *negated { "1 = 1" } else { "1 = 0" });
        }
        Condition::In {
            column,
            values,
            negated,
        } => {
            w.push(column);
            w.push(if *negated { " NOT IN (" } else { " IN (" });
            w.bind_list(values);
            w.push(")");
        }
        Condition::Between { column, low, high } => {
            w.push(column);
            w.push(" BETWEEN ");
            w.bind(low);
            w.push(" AND ");
            w.bind(high);
        }
        Condition::Null { column, negated } => {
            w.push(column);
            w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
    }
}

fn write_having(w: &mut SqlWriter, state: &QueryState) {
    if state.having.is_empty() {
        return;
    }

    w.push(" HAVING ");
    for (i, having) in state.having.iter().enumerate() {
        if i > 0 {
            w.push(" AND ");
        }
        w.push(&having.column);
        w.push(" ");
        w.push(having.operator.as_sql());
        w.push(" ");
        w.bind(&having.value);
    }
}

fn write_returning(w: &mut SqlWriter, state: &QueryState) {
    if !state.returning.is_empty() {
        w.push(" RETURNING ");
        w.push(&state.returning.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::state::{Conjunction, Having, Operator, Predicate};

    fn select_from(table: &str) -> QueryState {
        QueryState {
            operation: Some(Operation::Select),
            table: Some(table.into()),
            ..Default::default()
        }
    }

    fn compare(column: &str, value: i64, conjunction: Conjunction) -> Predicate {
        Predicate {
            conjunction,
            condition: Condition::Compare {
                column: column.into(),
                operator: Operator::Eq,
                value: Binding::Int(value),
            },
        }
    }

    #[test]
    fn test_compile_requires_operation() {
        let state = QueryState {
            table: Some("users".into()),
            ..Default::default()
        };
        let err = compile(&state).unwrap_err();
        assert!(err.to_string().contains("No operation"));
    }

    #[test]
    fn test_first_conjunction_is_never_emitted() {
        let mut state = select_from("users");
        state.predicates = vec![
            compare("a", 1, Conjunction::Or),
            compare("b", 2, Conjunction::Or),
        ];
        let compiled = compile(&state).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM users WHERE a = ? OR b = ?");
    }

    #[test]
    fn test_empty_in_lists() {
        let mut state = select_from("users");
        state.predicates = vec![
            Predicate {
                conjunction: Conjunction::And,
                condition: Condition::In {
                    column: "id".into(),
                    values: vec![],
                    negated: false,
                },
            },
            Predicate {
                conjunction: Conjunction::Or,
                condition: Condition::In {
                    column: "id".into(),
                    values: vec![],
                    negated: true,
                },
            },
        ];
        let compiled = compile(&state).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM users WHERE 1 = 0 OR 1 = 1");
        assert!(compiled.bindings.is_empty());
    }

    #[test]
    fn test_count_drops_order_and_paging() {
        let mut state = select_from("users");
        state.predicates = vec![compare("active", 1, Conjunction::And)];
        state.orders = vec![crate::query::state::Order {
            column: "id".into(),
            direction: crate::query::state::Direction::Desc,
        }];
        state.limit = Some(10);
        state.offset = Some(20);

        let compiled = compile_count(&state, "*").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) AS aggregate FROM users WHERE active = ?"
        );
        assert_eq!(compiled.bindings, vec![Binding::Int(1)]);
    }

    #[test]
    fn test_count_with_group_by_uses_derived_table() {
        let mut state = select_from("orders");
        state.columns = vec!["customer_id".into()];
        state.group_columns = vec!["customer_id".into()];
        state.having = vec![Having {
            column: "SUM(total)".into(),
            operator: Operator::Gt,
            value: Binding::Int(100),
        }];

        let compiled = compile_count(&state, "*").unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) AS aggregate FROM (SELECT customer_id FROM orders \
             GROUP BY customer_id HAVING SUM(total) > ?) AS grouped"
        );
        assert_eq!(compiled.bindings.len(), 1);
    }

    #[test]
    fn test_exists_wraps_select() {
        let mut state = select_from("users");
        state.predicates = vec![compare("id", 7, Conjunction::And)];
        state.limit = Some(5);
        let compiled = compile_exists(&state).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?) AS present"
        );
    }

    #[test]
    fn test_aggregates_reject_writes() {
        let mut state = select_from("users");
        state.operation = Some(Operation::Delete);
        assert!(compile_count(&state, "*").is_err());
        assert!(compile_exists(&state).is_err());
    }

    #[test]
    fn test_insert_without_values_is_error() {
        let mut state = select_from("users");
        state.operation = Some(Operation::Insert);
        assert!(compile(&state).is_err());
    }
}
