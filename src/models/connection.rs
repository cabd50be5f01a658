//! Connection-related data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL dialect an adapter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Dialect {
    PostgreSQL,
}

impl Dialect {
    /// Get the display name for this dialect.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
        }
    }

    /// Query listing whether a table exists in the current schema.
    pub(crate) fn has_table_sql(&self) -> &'static str {
        match self {
            Self::PostgreSQL => {
                "SELECT COUNT(*) AS aggregate FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = ?"
            }
        }
    }

    /// Query listing whether a column exists on a table in the current schema.
    pub(crate) fn has_column_sql(&self) -> &'static str {
        match self {
            Self::PostgreSQL => {
                "SELECT COUNT(*) AS aggregate FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = ? AND column_name = ?"
            }
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Public view of a registered connection (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub name: String,
    pub dialect: Dialect,
    /// Connection URL with the password masked.
    pub url: String,
    pub connected_at: DateTime<Utc>,
}

/// Point-in-time pool occupancy. Diagnostic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle or in use
    pub total: u32,
    pub idle: u32,
    /// Callers currently blocked waiting for a connection
    pub waiting: u32,
}

/// Outcome of probing one connection.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::PostgreSQL.to_string(), "postgresql");
    }

    #[test]
    fn test_introspection_queries_use_neutral_placeholders() {
        assert_eq!(Dialect::PostgreSQL.has_table_sql().matches('?').count(), 1);
        assert_eq!(Dialect::PostgreSQL.has_column_sql().matches('?').count(), 2);
    }

    #[test]
    fn test_health_report_skips_empty_fields() {
        let report = HealthReport {
            name: "main".into(),
            healthy: true,
            latency_ms: Some(3),
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["latency_ms"], 3);
    }
}
