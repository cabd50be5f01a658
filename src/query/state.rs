//! Accumulated builder state and the clause types it is made of.

use crate::error::{DbError, DbResult};
use crate::models::Binding;
use std::str::FromStr;

/// Statement kind. Unset until `select`/`insert`/`update`/`delete` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Binary comparison operators accepted by `where_op`, `having` and joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    /// `!=` and `<>` both parse to this
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    ILike,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::ILike => "ILIKE",
        }
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_uppercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::NotEq),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            "ILIKE" => Ok(Self::ILike),
            _ => Err(DbError::build(format!("Unsupported operator '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(DbError::build(format!("Unsupported order direction '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub left: String,
    pub operator: Operator,
    pub right: String,
}

/// One WHERE condition. Each variant has its own rendering rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        operator: Operator,
        value: Binding,
    },
    In {
        column: String,
        values: Vec<Binding>,
        negated: bool,
    },
    Between {
        column: String,
        low: Binding,
        high: Binding,
    },
    Null {
        column: String,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub conjunction: Conjunction,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    pub column: String,
    pub operator: Operator,
    pub value: Binding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Values for INSERT (row-major) or UPDATE (key order).
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValues {
    Insert {
        columns: Vec<String>,
        rows: Vec<Vec<Binding>>,
    },
    Update(Vec<(String, Binding)>),
}

/// Everything a builder has accumulated for one statement.
///
/// Misuse that can only be detected mid-chain (an unknown operator, a
/// malformed insert payload) is parked in `errors` and reported by the first
/// compilation, so chains never have to be broken up with `?`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub operation: Option<Operation>,
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub joins: Vec<Join>,
    pub predicates: Vec<Predicate>,
    pub group_columns: Vec<String>,
    pub having: Vec<Having>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub write_values: Option<WriteValues>,
    pub returning: Vec<String>,
    pub errors: Vec<String>,
}

impl QueryState {
    pub(crate) fn check(&self) -> DbResult<()> {
        match self.errors.first() {
            Some(message) => Err(DbError::build(message.clone())),
            None => Ok(()),
        }
    }

    pub(crate) fn table_name(&self) -> DbResult<&str> {
        self.table
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DbError::build("No table set: use table() or from()"))
    }
}
