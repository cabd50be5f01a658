//! Error types for pgforge.
//!
//! All fallible operations return [`DbResult`]. Driver failures are carried
//! unchanged inside [`DbError::Driver`] so callers can inspect the original
//! `sqlx::Error` (SQLSTATE, constraint name, ...) themselves.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Malformed builder usage, raised before any I/O happens.
    #[error("Build error: {message}")]
    Build { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {0}")]
    Driver(#[source] sqlx::Error),

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Connection not found: {name}")]
    ConnectionNotFound { name: String },

    #[error("Connection '{name}' already exists")]
    DuplicateConnection { name: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Migration '{name}' failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid migration set: {message}")]
    InvalidMigration { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Create a build error.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn connection_not_found(name: impl Into<String>) -> Self {
        Self::ConnectionNotFound { name: name.into() }
    }

    pub fn duplicate_connection(name: impl Into<String>) -> Self {
        Self::DuplicateConnection { name: name.into() }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Wrap the error raised by a migration unit.
    pub fn migration(name: impl Into<String>, source: DbError) -> Self {
        Self::Migration {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn invalid_migration(message: impl Into<String>) -> Self {
        Self::InvalidMigration {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Migration { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// SQLSTATE code of the underlying driver error, if the backend sent one.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            Self::Driver(sqlx::Error::Database(db_err)) => db_err.code().map(|c| c.to_string()),
            Self::Migration { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Driver(sqlx::Error::Io(_))
                | Self::Driver(sqlx::Error::PoolTimedOut)
        )
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Driver(err)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
