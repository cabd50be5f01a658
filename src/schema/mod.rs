//! Schema (DDL) builder.

pub mod builder;
pub mod column;
pub mod table;

pub use builder::Schema;
pub use column::{ColumnDef, ColumnType, DefaultValue, ForeignKeyDef, IndexDef, ReferentialAction};
pub use table::{ColumnBuilder, ForeignKeyBuilder, TableBuilder, TableMode};
