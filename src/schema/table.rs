//! Table definitions and their compilation to DDL.

use crate::error::{DbError, DbResult};
use crate::models::{Binding, Dialect};
use crate::schema::column::{
    ColumnDef, ColumnType, DefaultValue, ForeignKeyDef, IndexDef, ReferentialAction,
};

const DEFAULT_STRING_LENGTH: u32 = 255;

/// Whether the builder describes a new table or changes to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    Create,
    Alter,
}

/// Accumulates one table definition. Performs no I/O.
///
/// Column factories return a [`ColumnBuilder`] scoped to the column they
/// added, so modifiers always land on the right column no matter how the
/// calls interleave.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    mode: TableMode,
    if_not_exists: bool,
    columns: Vec<ColumnDef>,
    primary_key: Option<String>,
    foreign_keys: Vec<ForeignKeyDef>,
    indexes: Vec<IndexDef>,
    drops: Vec<String>,
    errors: Vec<String>,
}

impl TableBuilder {
    pub fn create(name: &str) -> Self {
        Self::with_mode(name, TableMode::Create)
    }

    pub fn alter(name: &str) -> Self {
        Self::with_mode(name, TableMode::Alter)
    }

    fn with_mode(name: &str, mode: TableMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            if_not_exists: false,
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            drops: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// Render `CREATE TABLE IF NOT EXISTS`.
    pub fn if_not_exists(&mut self) -> &mut Self {
        self.if_not_exists = true;
        self
    }

    // ---- Column factories -------------------------------------------------

    /// Auto-incrementing integer primary key. A later call moves the
    /// primary key pointer to the newer column.
    pub fn increments(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.primary_key = Some(name.to_string());
        self.add_column(name, ColumnType::Increments).not_nullable()
    }

    pub fn big_increments(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.primary_key = Some(name.to_string());
        self.add_column(name, ColumnType::BigIncrements).not_nullable()
    }

    pub fn string(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::String(DEFAULT_STRING_LENGTH))
    }

    pub fn string_with_length(&mut self, name: &str, length: u32) -> ColumnBuilder<'_> {
        if length == 0 {
            self.errors
                .push(format!("Column '{}' must have a positive length", name));
        }
        self.add_column(name, ColumnType::String(length))
    }

    pub fn text(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Text)
    }

    pub fn integer(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::BigInteger)
    }

    pub fn decimal(&mut self, name: &str, precision: u32, scale: u32) -> ColumnBuilder<'_> {
        if precision == 0 || scale > precision {
            self.errors.push(format!(
                "Column '{}' has invalid precision/scale ({}, {})",
                name, precision, scale
            ));
        }
        self.add_column(name, ColumnType::Decimal { precision, scale })
    }

    pub fn float(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Float)
    }

    pub fn boolean(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Boolean)
    }

    pub fn date(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Date)
    }

    pub fn timestamp(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Timestamp)
    }

    pub fn timestamp_tz(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::TimestampTz)
    }

    pub fn json(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Json)
    }

    pub fn jsonb(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Jsonb)
    }

    pub fn uuid(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Uuid)
    }

    pub fn binary(&mut self, name: &str) -> ColumnBuilder<'_> {
        self.add_column(name, ColumnType::Binary)
    }

    /// `VARCHAR(255)` restricted to `values` by a CHECK constraint.
    pub fn enumeration<I, S>(&mut self, name: &str, values: I) -> ColumnBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.errors
                .push(format!("Enum column '{}' needs at least one value", name));
        }
        self.add_column(name, ColumnType::Enum(values))
    }

    // ---- Composite helpers -------------------------------------------------

    /// `created_at` and `updated_at`, both defaulting to `CURRENT_TIMESTAMP`.
    pub fn add_timestamps(&mut self) {
        for name in ["created_at", "updated_at"] {
            self.timestamp(name)
                .not_nullable()
                .default_raw("CURRENT_TIMESTAMP");
        }
    }

    /// Nullable `deleted_at`.
    pub fn add_soft_deletes(&mut self) {
        self.timestamp("deleted_at").nullable();
    }

    pub fn add_index<I, S>(&mut self, columns: I, name: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_index(columns.into_iter().map(Into::into).collect(), name, false);
    }

    pub fn add_unique<I, S>(&mut self, columns: I, name: Option<&str>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_index(columns.into_iter().map(Into::into).collect(), name, true);
    }

    /// Set the primary key pointer without adding a column.
    pub fn primary(&mut self, column: &str) {
        self.primary_key = Some(column.to_string());
    }

    /// Only valid on `alter_table`.
    pub fn drop_column(&mut self, name: &str) {
        self.drops.push(name.to_string());
    }

    /// Start a foreign key on an existing column.
    pub fn foreign(&mut self, column: &str) -> ForeignKeyBuilder<'_> {
        self.foreign_keys.push(ForeignKeyDef::new(column));
        let index = self.foreign_keys.len() - 1;
        ForeignKeyBuilder { table: self, index }
    }

    fn add_column(&mut self, name: &str, column_type: ColumnType) -> ColumnBuilder<'_> {
        if name.trim().is_empty() {
            self.errors.push("Column name cannot be empty".to_string());
        }
        self.columns.push(ColumnDef::new(name, column_type));
        let index = self.columns.len() - 1;
        ColumnBuilder { table: self, index }
    }

    fn push_index(&mut self, columns: Vec<String>, name: Option<&str>, unique: bool) {
        if columns.is_empty() {
            self.errors.push(format!(
                "Index on '{}' needs at least one column",
                self.name
            ));
            return;
        }
        let name = match name {
            Some(name) => name.to_string(),
            None => IndexDef::default_name(&self.name, &columns, unique),
        };
        self.indexes.push(IndexDef {
            name,
            columns,
            unique,
        });
    }

    // ---- Compilation -------------------------------------------------------

    fn check(&self) -> DbResult<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::build("Table name cannot be empty"));
        }
        match self.errors.first() {
            Some(message) => Err(DbError::build(message.clone())),
            None => Ok(()),
        }
    }

    /// One `CREATE TABLE` statement: columns, then the primary key, then
    /// one FOREIGN KEY line per foreign key.
    pub fn to_sql(&self, dialect: Dialect) -> DbResult<String> {
        self.check()?;
        if !self.drops.is_empty() {
            return Err(DbError::build(format!(
                "drop_column is only valid when altering '{}'",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(DbError::build(format!(
                "Table '{}' has no columns",
                self.name
            )));
        }

        let mut lines: Vec<String> = self.columns.iter().map(|c| c.sql(dialect)).collect();
        if let Some(pk) = &self.primary_key {
            lines.push(format!("PRIMARY KEY ({})", pk));
        }
        for fk in &self.foreign_keys {
            lines.push(fk.sql().map_err(DbError::build)?);
        }

        Ok(format!(
            "CREATE TABLE {}{} ({})",
            if self.if_not_exists {
                "IF NOT EXISTS "
            } else {
                ""
            },
            self.name,
            lines.join(", ")
        ))
    }

    /// `CREATE [UNIQUE] INDEX` statements for every index definition.
    pub fn index_statements(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.sql(&self.name)).collect()
    }

    /// One statement per change, in this order: added columns, dropped
    /// columns, primary key, foreign keys, indexes.
    pub fn to_sql_array(&self, dialect: Dialect) -> DbResult<Vec<String>> {
        self.check()?;

        let mut statements = Vec::new();
        for column in &self.columns {
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.name,
                column.sql(dialect)
            ));
        }
        for column in &self.drops {
            statements.push(format!("ALTER TABLE {} DROP COLUMN {}", self.name, column));
        }
        if let Some(pk) = &self.primary_key {
            statements.push(format!("ALTER TABLE {} ADD PRIMARY KEY ({})", self.name, pk));
        }
        for fk in &self.foreign_keys {
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {}_{}_foreign {}",
                self.name,
                self.name.replace('.', "_"),
                fk.column,
                fk.sql().map_err(DbError::build)?
            ));
        }
        statements.extend(self.index_statements());

        if statements.is_empty() {
            return Err(DbError::build(format!(
                "No changes recorded for table '{}'",
                self.name
            )));
        }
        Ok(statements)
    }

    /// Everything needed to apply this definition, in execution order.
    pub fn statements(&self, dialect: Dialect) -> DbResult<Vec<String>> {
        match self.mode {
            TableMode::Create => {
                let mut statements = vec![self.to_sql(dialect)?];
                statements.extend(self.index_statements());
                Ok(statements)
            }
            TableMode::Alter => self.to_sql_array(dialect),
        }
    }
}

/// Modifier handle for the column most recently added by a factory.
#[derive(Debug)]
pub struct ColumnBuilder<'t> {
    table: &'t mut TableBuilder,
    index: usize,
}

impl<'t> ColumnBuilder<'t> {
    fn column(&mut self) -> &mut ColumnDef {
        &mut self.table.columns[self.index]
    }

    fn column_name(&self) -> String {
        self.table.columns[self.index].name.clone()
    }

    pub fn not_nullable(mut self) -> Self {
        self.column().nullable = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.column().nullable = true;
        self
    }

    /// Literal default, quoted as needed.
    pub fn default(mut self, value: impl Into<Binding>) -> Self {
        self.column().default = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// SQL expression default, spliced as written.
    pub fn default_raw(mut self, expression: &str) -> Self {
        self.column().default = Some(DefaultValue::Raw(expression.to_string()));
        self
    }

    pub fn unique(mut self) -> Self {
        self.column().unique = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.column().unsigned = true;
        self
    }

    pub fn check(mut self, expression: &str) -> Self {
        self.column().checks.push(expression.to_string());
        self
    }

    pub fn primary(self) -> Self {
        let name = self.column_name();
        self.table.primary_key = Some(name);
        self
    }

    /// Plain index with the default name.
    pub fn index(self) -> Self {
        let name = self.column_name();
        self.table.push_index(vec![name], None, false);
        self
    }

    pub fn index_named(self, index_name: &str) -> Self {
        let name = self.column_name();
        self.table.push_index(vec![name], Some(index_name), false);
        self
    }

    /// Turn this column into a foreign key pointing at `column`; finish with
    /// [`ForeignKeyBuilder::on`].
    pub fn references(self, column: &str) -> ForeignKeyBuilder<'t> {
        let name = self.column_name();
        let mut fk = ForeignKeyDef::new(&name);
        fk.references_column = Some(column.to_string());
        self.table.foreign_keys.push(fk);
        let index = self.table.foreign_keys.len() - 1;
        ForeignKeyBuilder {
            table: self.table,
            index,
        }
    }
}

/// Modifier handle for one foreign key.
#[derive(Debug)]
pub struct ForeignKeyBuilder<'t> {
    table: &'t mut TableBuilder,
    index: usize,
}

impl ForeignKeyBuilder<'_> {
    fn key(&mut self) -> &mut ForeignKeyDef {
        &mut self.table.foreign_keys[self.index]
    }

    pub fn references(mut self, column: &str) -> Self {
        self.key().references_column = Some(column.to_string());
        self
    }

    pub fn on(mut self, table: &str) -> Self {
        self.key().references_table = Some(table.to_string());
        self
    }

    /// One of `CASCADE`, `SET NULL`, `SET DEFAULT`, `RESTRICT`, `NO ACTION`.
    pub fn on_delete(mut self, action: &str) -> Self {
        match action.parse::<ReferentialAction>() {
            Ok(action) => self.key().on_delete = Some(action),
            Err(e) => self.table.errors.push(e.to_string()),
        }
        self
    }

    pub fn on_update(mut self, action: &str) -> Self {
        match action.parse::<ReferentialAction>() {
            Ok(action) => self.key().on_update = Some(action),
            Err(e) => self.table.errors.push(e.to_string()),
        }
        self
    }
}
