//! Result shapes returned by executors and builders.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row, keyed by column name in select order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Outcome of a statement: affected row count plus any returned rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub row_count: u64,
    pub rows: Vec<Row>,
}

impl ExecResult {
    /// Result for a statement that returned rows (SELECT or `RETURNING`).
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            row_count: rows.len() as u64,
            rows,
        }
    }

    /// Result for a write that returned nothing but a count.
    pub fn affected(row_count: u64) -> Self {
        Self {
            row_count,
            rows: Vec::new(),
        }
    }
}

/// Pagination metadata computed by `QueryBuilder::paginate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub from: u64,
    pub to: u64,
}

impl Pagination {
    /// `last_page = ceil(total / per_page)`, `from = offset + 1`,
    /// `to = min(offset + per_page, total)`.
    ///
    /// `page` and `per_page` start at 1. An offset past what PostgreSQL's
    /// `OFFSET` accepts is a build error.
    pub fn compute(total: u64, page: u64, per_page: u64) -> DbResult<Self> {
        let offset = Self::offset_for(page, per_page)?;
        Ok(Self {
            total,
            per_page,
            current_page: page,
            last_page: total.div_ceil(per_page),
            from: offset + 1,
            to: offset.saturating_add(per_page).min(total),
        })
    }

    /// Rows skipped before `page`.
    pub fn offset_for(page: u64, per_page: u64) -> DbResult<u64> {
        if page == 0 || per_page == 0 {
            return Err(DbError::build(
                "pagination needs page and per_page of at least 1",
            ));
        }
        (page - 1)
            .checked_mul(per_page)
            .filter(|offset| *offset <= i64::MAX as u64)
            .ok_or_else(|| {
                DbError::build(format!(
                    "page {} with {} rows per page is past the largest row offset",
                    page, per_page
                ))
            })
    }

    pub fn offset(&self) -> u64 {
        self.current_page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// One page of rows plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Row>,
    pub pagination: Pagination,
}
