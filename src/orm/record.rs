//! Materialized rows
//!
//! A [`Record`] keeps the column order of the SELECT that produced it.
//! Eager-loaded relations are stored under the relation name.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::traits::SqlValue;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, JsonValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    /// Column value as a bindable value; missing columns read as NULL.
    pub fn value(&self, column: &str) -> SqlValue {
        self.0.get(column).map_or(SqlValue::Null, SqlValue::from_json)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(JsonValue::as_str)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(JsonValue::as_i64)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: JsonValue) {
        self.0.insert(column.into(), value);
    }

    /// Builder form of [`Record::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn remove(&mut self, column: &str) -> Option<JsonValue> {
        self.0.shift_remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }

    /// Deserialize into a caller-defined type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(JsonValue::Object(self.0.clone()))?)
    }
}

impl From<Map<String, JsonValue>> for Record {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: i64,
        name: String,
    }

    #[test]
    fn test_decode_into_struct() {
        let mut record = Record::new();
        record.insert("id", json!(7));
        record.insert("name", json!("ada"));
        let row: Row = record.decode().unwrap();
        assert_eq!(
            row,
            Row {
                id: 7,
                name: "ada".to_string()
            }
        );
    }

    #[test]
    fn test_missing_column_is_null() {
        let record = Record::new();
        assert_eq!(record.value("nope"), SqlValue::Null);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut record = Record::new().with("a", 1).with("b", 2).with("c", 3);
        assert_eq!(record.remove("a"), Some(json!(1)));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_column_order_preserved() {
        let mut record = Record::new();
        record.insert("z", json!(1));
        record.insert("a", json!(2));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["z", "a"]);
    }
}
