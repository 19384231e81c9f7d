//! SQLite helper utilities
//!
//! Identifier validation, row decoding and timestamp helpers shared by the
//! query builder and the repository.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value as JsonValue};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::{RepositoryError, Result};
use crate::orm::Record;

// ============================================================================
// Identifier Helpers
// ============================================================================

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\*|[A-Za-z_][A-Za-z0-9_]*(\.([A-Za-z_][A-Za-z0-9_]*|\*))?( (?i:as) [A-Za-z_][A-Za-z0-9_]*)?)$",
    )
    .expect("identifier pattern is valid")
});

/// Check that `name` is safe to splice into SQL text as a column or table.
///
/// Accepts `col`, `table.col`, `table.*`, `*` and an optional `as alias`.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// [`is_identifier`] as a validation error.
pub fn ensure_identifier(name: &str) -> Result<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(RepositoryError::validation(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

/// Comma-separated `?` placeholders; `0 = 1` callers must special-case zero.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// ============================================================================
// Row Decoding
// ============================================================================

/// Decode a SQLite row into an ordered [`Record`] using each value's storage class.
pub fn decode_row(row: &SqliteRow) -> std::result::Result<Record, sqlx::Error> {
    let mut map = Map::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let storage = {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };

        let value = match storage.as_deref() {
            None => JsonValue::Null,
            Some("INTEGER") | Some("BOOLEAN") => {
                JsonValue::from(row.try_get_unchecked::<i64, _>(i)?)
            }
            Some("REAL") | Some("NUMERIC") => {
                let f = row.try_get_unchecked::<f64, _>(i)?;
                Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
            }
            Some("BLOB") => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect())
            }
            Some(_) => JsonValue::String(row.try_get_unchecked::<String, _>(i)?),
        };

        map.insert(column.name().to_string(), value);
    }

    Ok(Record::from_map(map))
}

// ============================================================================
// Timestamp Helpers (stored as ISO8601 TEXT in SQLite)
// ============================================================================

/// Current UTC timestamp in SQLite's `datetime()` format.
///
/// This keeps `DATE(column)` comparisons working on stored timestamps.
#[inline]
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
