//! PostgreSQL row decoding.
//!
//! Rows come back from the driver as [`PgRow`]s and leave the adapter as
//! [`Row`] maps of JSON values.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders handle the actual value extraction
//!
//! Values without an exact JSON representation (NUMERIC, timestamps, UUIDs,
//! intervals, bytea) are rendered as strings. A value that cannot be decoded
//! is an error, never a silent `null`.

use crate::error::{DbError, DbResult};
use crate::models::Row;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::postgres::{PgRow, PgTypeInfo, PgTypeKind, PgValueFormat};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for PostgreSQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    TimeTz,
    Interval,
    Array,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();
    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    match lower.as_str() {
        "numeric" | "decimal" => TypeCategory::Decimal,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "serial" | "bigserial" => {
            TypeCategory::Integer
        }
        "bool" | "boolean" => TypeCategory::Boolean,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" => TypeCategory::Binary,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "timetz" => TypeCategory::TimeTz,
        "interval" => TypeCategory::Interval,
        "text" | "varchar" | "bpchar" | "char" | "name" | "unknown" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode bytea contents as base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Render an interval the way PostgreSQL's default output style does,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
pub fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let plural = |n: i64, unit: &str, units: &str| {
        format!("{} {}", n, if n.abs() == 1 { unit } else { units })
    };

    let years = i64::from(interval.months / 12);
    let months = i64::from(interval.months % 12);
    if years != 0 {
        parts.push(plural(years, "year", "years"));
    }
    if months != 0 {
        parts.push(plural(months, "mon", "mons"));
    }
    if interval.days != 0 {
        parts.push(plural(i64::from(interval.days), "day", "days"));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let (secs, frac) = (abs / 1_000_000, abs % 1_000_000);
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        if frac != 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> DbResult<Row>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> DbResult<Row> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let value = decode_column(self, idx, col.type_info()).map_err(DbError::from)?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

// =============================================================================
// Decoders
// =============================================================================

type Decoded = Result<JsonValue, sqlx::Error>;

fn column_error(idx: usize, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: message.into(),
    }
}

fn decode_column(row: &PgRow, idx: usize, type_info: &PgTypeInfo) -> Decoded {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    // Unprepared statements (no bindings) return every value as text.
    let text_format = raw.format() == PgValueFormat::Text;

    match categorize_type(type_info.name()) {
        TypeCategory::Decimal => decode_with::<rust_decimal::Decimal, _>(row, idx, |v| {
            JsonValue::String(v.to_string())
        }),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_with::<bool, _>(row, idx, JsonValue::Bool),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_with::<Vec<u8>, _>(row, idx, |v| decode_binary_value(&v)),
        TypeCategory::Json => decode_with::<JsonValue, _>(row, idx, |v| v),
        TypeCategory::Uuid => {
            decode_with::<uuid::Uuid, _>(row, idx, |v| JsonValue::String(v.to_string()))
        }
        TypeCategory::Timestamp => decode_with::<chrono::NaiveDateTime, _>(row, idx, |v| {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        TypeCategory::TimestampTz => {
            decode_with::<chrono::DateTime<chrono::Utc>, _>(row, idx, |v| {
                JsonValue::String(v.to_rfc3339())
            })
        }
        TypeCategory::Date => {
            decode_with::<chrono::NaiveDate, _>(row, idx, |v| JsonValue::String(v.to_string()))
        }
        TypeCategory::Time => {
            decode_with::<chrono::NaiveTime, _>(row, idx, |v| JsonValue::String(v.to_string()))
        }
        TypeCategory::TimeTz => decode_with::<PgTimeTz, _>(row, idx, |v| {
            JsonValue::String(format!("{}{}", v.time, v.offset))
        }),
        TypeCategory::Interval if text_format => raw_text(idx, raw.as_str()),
        TypeCategory::Interval => decode_with::<PgInterval, _>(row, idx, |v| {
            JsonValue::String(format_interval(&v))
        }),
        TypeCategory::Array => decode_array(row, idx, type_info.name()),
        TypeCategory::Text => decode_with::<String, _>(row, idx, JsonValue::String),
        TypeCategory::Unknown if text_format => raw_text(idx, raw.as_str()),
        TypeCategory::Unknown => match type_info.kind() {
            // Enum labels travel as UTF-8 in both formats.
            PgTypeKind::Enum(_) => row
                .try_get_unchecked::<String, _>(idx)
                .map(JsonValue::String),
            _ => Err(column_error(
                idx,
                format!("unsupported column type {}", type_info.name()),
            )),
        },
    }
}

fn raw_text(idx: usize, text: Result<&str, sqlx::error::BoxDynError>) -> Decoded {
    text.map(|s| JsonValue::String(s.to_string()))
        .map_err(|source| sqlx::Error::ColumnDecode {
            index: idx.to_string(),
            source,
        })
}

fn decode_with<'r, T, F>(row: &'r PgRow, idx: usize, f: F) -> Decoded
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    F: FnOnce(T) -> JsonValue,
{
    Ok(row
        .try_get::<Option<T>, _>(idx)?
        .map(f)
        .unwrap_or(JsonValue::Null))
}

fn decode_integer(row: &PgRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(v.map(JsonValue::from).unwrap_or(JsonValue::Null));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(JsonValue::from).unwrap_or(JsonValue::Null));
    }
    decode_with::<i16, _>(row, idx, JsonValue::from)
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn decode_float(row: &PgRow, idx: usize) -> Decoded {
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return Ok(v.map(float_json).unwrap_or(JsonValue::Null));
    }
    decode_with::<f32, _>(row, idx, |v| float_json(f64::from(v)))
}

/// One-dimensional arrays of scalar element types become JSON arrays.
fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> Decoded {
    fn list<T>(items: Vec<Option<T>>, f: impl Fn(T) -> JsonValue) -> JsonValue {
        JsonValue::Array(
            items
                .into_iter()
                .map(|item| item.map(&f).unwrap_or(JsonValue::Null))
                .collect(),
        )
    }

    let element = type_name.trim_end_matches("[]");
    match categorize_type(element) {
        TypeCategory::Integer => match element.to_lowercase().as_str() {
            "int2" | "smallint" => {
                decode_with::<Vec<Option<i16>>, _>(row, idx, |v| list(v, JsonValue::from))
            }
            "int4" | "integer" => {
                decode_with::<Vec<Option<i32>>, _>(row, idx, |v| list(v, JsonValue::from))
            }
            _ => decode_with::<Vec<Option<i64>>, _>(row, idx, |v| list(v, JsonValue::from)),
        },
        TypeCategory::Float => match element.to_lowercase().as_str() {
            "float4" | "real" => decode_with::<Vec<Option<f32>>, _>(row, idx, |v| {
                list(v, |f| float_json(f64::from(f)))
            }),
            _ => decode_with::<Vec<Option<f64>>, _>(row, idx, |v| list(v, float_json)),
        },
        TypeCategory::Decimal => decode_with::<Vec<Option<rust_decimal::Decimal>>, _>(
            row,
            idx,
            |v| list(v, |d| JsonValue::String(d.to_string())),
        ),
        TypeCategory::Boolean => {
            decode_with::<Vec<Option<bool>>, _>(row, idx, |v| list(v, JsonValue::Bool))
        }
        TypeCategory::Text => {
            decode_with::<Vec<Option<String>>, _>(row, idx, |v| list(v, JsonValue::String))
        }
        TypeCategory::Uuid => decode_with::<Vec<Option<uuid::Uuid>>, _>(row, idx, |v| {
            list(v, |u| JsonValue::String(u.to_string()))
        }),
        TypeCategory::Json => decode_with::<Vec<Option<JsonValue>>, _>(row, idx, |v| list(v, |j| j)),
        _ => {
            let raw = row.try_get_raw(idx)?;
            if raw.format() == PgValueFormat::Text {
                raw_text(idx, raw.as_str())
            } else {
                Err(column_error(idx, format!("unsupported column type {}", type_name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("INT8"), TypeCategory::Integer);
        assert_eq!(categorize_type("int2"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
    }

    #[test]
    fn test_categorize_type_json() {
        assert_eq!(categorize_type("json"), TypeCategory::Json);
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
    }

    #[test]
    fn test_categorize_type_fallbacks() {
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("INET"), TypeCategory::Unknown);
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Interval);
        assert_eq!(categorize_type("TEXT[]"), TypeCategory::Array);
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(decode_binary_value(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_format_interval_matches_postgres_output() {
        let day = PgInterval {
            months: 0,
            days: 1,
            microseconds: 0,
        };
        assert_eq!(format_interval(&day), "1 day");

        let mixed = PgInterval {
            months: 14,
            days: 3,
            microseconds: 14_706_500_000,
        };
        assert_eq!(format_interval(&mixed), "1 year 2 mons 3 days 04:05:06.5");

        let zero = PgInterval {
            months: 0,
            days: 0,
            microseconds: 0,
        };
        assert_eq!(format_interval(&zero), "00:00:00");

        let negative = PgInterval {
            months: 0,
            days: 0,
            microseconds: -90_000_000,
        };
        assert_eq!(format_interval(&negative), "-00:01:30");
    }
}
