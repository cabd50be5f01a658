//! Column, index and foreign-key definitions and their DDL fragments.

use crate::error::DbError;
use crate::models::{Binding, Dialect};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Increments,
    BigIncrements,
    String(u32),
    Text,
    Integer,
    BigInteger,
    Decimal { precision: u32, scale: u32 },
    Float,
    Boolean,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Binary,
    Enum(Vec<String>),
}

impl ColumnType {
    pub fn sql(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::PostgreSQL => match self {
                Self::Increments => "SERIAL".to_string(),
                Self::BigIncrements => "BIGSERIAL".to_string(),
                Self::String(length) => format!("VARCHAR({})", length),
                Self::Text => "TEXT".to_string(),
                Self::Integer => "INTEGER".to_string(),
                Self::BigInteger => "BIGINT".to_string(),
                Self::Decimal { precision, scale } => format!("NUMERIC({}, {})", precision, scale),
                Self::Float => "DOUBLE PRECISION".to_string(),
                Self::Boolean => "BOOLEAN".to_string(),
                Self::Date => "DATE".to_string(),
                Self::Timestamp => "TIMESTAMP".to_string(),
                Self::TimestampTz => "TIMESTAMPTZ".to_string(),
                Self::Json => "JSON".to_string(),
                Self::Jsonb => "JSONB".to_string(),
                Self::Uuid => "UUID".to_string(),
                Self::Binary => "BYTEA".to_string(),
                Self::Enum(_) => "VARCHAR(255)".to_string(),
            },
        }
    }

    fn is_serial(&self) -> bool {
        matches!(self, Self::Increments | Self::BigIncrements)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Rendered as a quoted SQL literal
    Literal(Binding),
    /// Spliced verbatim, e.g. `CURRENT_TIMESTAMP`
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub unique: bool,
    pub unsigned: bool,
    pub checks: Vec<String>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            default: None,
            unique: false,
            unsigned: false,
            checks: Vec::new(),
        }
    }

    /// `name TYPE [NOT NULL] [DEFAULT ..] [UNIQUE] [CHECK (..)]...`
    pub fn sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql(dialect));

        if !self.nullable && !self.column_type.is_serial() {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default_sql(default));
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if self.unsigned {
            sql.push_str(&format!(" CHECK ({} >= 0)", self.name));
        }
        if let ColumnType::Enum(values) = &self.column_type {
            let allowed: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            sql.push_str(&format!(" CHECK ({} IN ({}))", self.name, allowed.join(", ")));
        }
        for check in &self.checks {
            sql.push_str(&format!(" CHECK ({})", check));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    /// `<table>_<col>_<col>_index`, or `_unique` for unique indexes.
    pub fn default_name(table: &str, columns: &[String], unique: bool) -> String {
        let suffix = if unique { "unique" } else { "index" };
        format!("{}_{}_{}", table, columns.join("_"), suffix).replace('.', "_")
    }

    pub fn sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

impl FromStr for ReferentialAction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .replace('_', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        match normalized.as_str() {
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "SET DEFAULT" => Ok(Self::SetDefault),
            "RESTRICT" => Ok(Self::Restrict),
            "NO ACTION" => Ok(Self::NoAction),
            _ => Err(DbError::build(format!("Unsupported referential action '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub column: String,
    pub references_column: Option<String>,
    pub references_table: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

impl ForeignKeyDef {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            references_column: None,
            references_table: None,
            on_delete: None,
            on_update: None,
        }
    }

    /// `FOREIGN KEY (col) REFERENCES table (ref) [ON DELETE ..] [ON UPDATE ..]`
    pub fn sql(&self) -> Result<String, String> {
        let table = self.references_table.as_deref().ok_or_else(|| {
            format!(
                "Foreign key on '{}' has no referenced table: call on()",
                self.column
            )
        })?;
        let column = self.references_column.as_deref().ok_or_else(|| {
            format!(
                "Foreign key on '{}' has no referenced column: call references()",
                self.column
            )
        })?;

        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column, table, column
        );
        if let Some(action) = self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.as_sql());
        }
        if let Some(action) = self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.as_sql());
        }
        Ok(sql)
    }
}

/// Quote a string as a SQL literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn default_sql(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Raw(expr) => expr.clone(),
        DefaultValue::Literal(value) => match value {
            Binding::Null => "NULL".to_string(),
            Binding::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Binding::Int(i) => i.to_string(),
            Binding::Float(f) => f.to_string(),
            Binding::Text(s) => quote_literal(s),
            Binding::Uuid(u) => quote_literal(&u.to_string()),
            Binding::Timestamp(t) => quote_literal(&t.to_rfc3339()),
            Binding::Json(v) => quote_literal(&v.to_string()),
            Binding::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("'\\x{}'", hex)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: Dialect = Dialect::PostgreSQL;

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::String(255).sql(PG), "VARCHAR(255)");
        assert_eq!(
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
            .sql(PG),
            "NUMERIC(10, 2)"
        );
        assert_eq!(ColumnType::BigIncrements.sql(PG), "BIGSERIAL");
    }

    #[test]
    fn test_column_def_modifiers() {
        let mut col = ColumnDef::new("age", ColumnType::Integer);
        col.nullable = false;
        col.unsigned = true;
        col.default = Some(DefaultValue::Literal(Binding::Int(0)));
        assert_eq!(
            col.sql(PG),
            "age INTEGER NOT NULL DEFAULT 0 CHECK (age >= 0)"
        );
    }

    #[test]
    fn test_enum_renders_check() {
        let col = ColumnDef::new(
            "status",
            ColumnType::Enum(vec!["draft".into(), "it's live".into()]),
        );
        assert_eq!(
            col.sql(PG),
            "status VARCHAR(255) CHECK (status IN ('draft', 'it''s live'))"
        );
    }

    #[test]
    fn test_serial_skips_not_null() {
        let mut col = ColumnDef::new("id", ColumnType::Increments);
        col.nullable = false;
        assert_eq!(col.sql(PG), "id SERIAL");
    }

    #[test]
    fn test_default_literals() {
        assert_eq!(
            default_sql(&DefaultValue::Literal(Binding::Text("o'k".into()))),
            "'o''k'"
        );
        assert_eq!(default_sql(&DefaultValue::Literal(Binding::Bool(true))), "TRUE");
        assert_eq!(
            default_sql(&DefaultValue::Literal(Binding::Bytes(vec![0xde, 0xad]))),
            "'\\xdead'"
        );
        assert_eq!(
            default_sql(&DefaultValue::Raw("CURRENT_TIMESTAMP".into())),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_index_default_names() {
        let cols = vec!["email".to_string(), "tenant_id".to_string()];
        assert_eq!(
            IndexDef::default_name("users", &cols, false),
            "users_email_tenant_id_index"
        );
        assert_eq!(
            IndexDef::default_name("users", &cols[..1], true),
            "users_email_unique"
        );
    }

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            "cascade".parse::<ReferentialAction>().unwrap(),
            ReferentialAction::Cascade
        );
        assert_eq!(
            "set_null".parse::<ReferentialAction>().unwrap(),
            ReferentialAction::SetNull
        );
        assert_eq!(
            "No Action".parse::<ReferentialAction>().unwrap(),
            ReferentialAction::NoAction
        );
        assert!("explode".parse::<ReferentialAction>().is_err());
    }

    #[test]
    fn test_foreign_key_requires_target() {
        let mut fk = ForeignKeyDef::new("team_id");
        fk.references_column = Some("id".into());
        assert!(fk.sql().is_err());
        fk.references_table = Some("teams".into());
        fk.on_delete = Some(ReferentialAction::Cascade);
        assert_eq!(
            fk.sql().unwrap(),
            "FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE"
        );
    }
}
