//! Eager loading
//!
//! Each eager-load directive costs exactly one extra query, whatever the
//! number of parent rows: related rows are fetched with a single `IN` over
//! the parents' keys and attached under the relation name.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;
use sqlx::SqlitePool;

use super::record::Record;
use super::traits::{RelationDef, RelationKind, SqlValue};
use crate::db::sqlite_helpers::{decode_row, placeholders};
use crate::error::Result;

/// A relation to load and the columns to project from it.
#[derive(Debug, Clone, PartialEq)]
pub struct EagerLoad {
    pub relation: &'static RelationDef,
    pub columns: Vec<String>,
}

impl EagerLoad {
    /// Projection with the matching key guaranteed present.
    fn select_list(&self) -> String {
        let wants_all = self.columns.is_empty() || self.columns.iter().any(|c| c == "*");
        if wants_all {
            return "*".to_string();
        }
        let key = self.relation.related_key;
        let mut columns = self.columns.clone();
        if !columns.iter().any(|c| c == key) {
            columns.push(key.to_string());
        }
        columns.join(", ")
    }
}

fn key_of(value: &SqlValue) -> String {
    value.to_string()
}

/// Run every directive against `parents`.
pub async fn load_eager(pool: &SqlitePool, parents: &mut [Record], loads: &[EagerLoad]) -> Result<()> {
    if parents.is_empty() {
        return Ok(());
    }
    for load in loads {
        load_relation(pool, parents, load).await?;
    }
    Ok(())
}

async fn load_relation(pool: &SqlitePool, parents: &mut [Record], load: &EagerLoad) -> Result<()> {
    let rel = load.relation;

    let missing = parents.iter().filter(|p| !p.contains(rel.parent_key)).count();
    if missing > 0 {
        tracing::warn!(
            relation = rel.name,
            parent_key = rel.parent_key,
            missing,
            "Parent rows lack the relation key; they get an empty relation"
        );
    }

    let mut seen = HashSet::new();
    let keys: Vec<SqlValue> = parents
        .iter()
        .map(|p| p.value(rel.parent_key))
        .filter(|k| !k.is_null())
        .filter(|k| seen.insert(key_of(k)))
        .collect();

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    if !keys.is_empty() {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            load.select_list(),
            rel.table,
            rel.related_key,
            placeholders(keys.len())
        );
        tracing::debug!(relation = rel.name, sql = %sql, "Eager loading relation");

        let mut query = sqlx::query(&sql);
        for key in &keys {
            query = key.bind_to_query(query);
        }
        let rows = query.fetch_all(pool).await?;

        for row in &rows {
            let record = decode_row(row)?;
            grouped
                .entry(key_of(&record.value(rel.related_key)))
                .or_default()
                .push(record);
        }
    }

    for parent in parents.iter_mut() {
        let key = parent.value(rel.parent_key);
        let related = if key.is_null() {
            None
        } else {
            grouped.get(&key_of(&key))
        };
        let value = match rel.kind {
            RelationKind::Many => JsonValue::Array(
                related
                    .map(|rows| rows.iter().map(|r| JsonValue::Object(r.as_map().clone())).collect())
                    .unwrap_or_default(),
            ),
            RelationKind::One => related
                .and_then(|rows| rows.first())
                .map_or(JsonValue::Null, |r| JsonValue::Object(r.as_map().clone())),
        };
        parent.insert(rel.name, value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    static POSTS: RelationDef = RelationDef::has_many("posts", "posts", "user_id", "id");

    #[test]
    fn test_select_list_adds_key() {
        let load = EagerLoad {
            relation: &POSTS,
            columns: vec!["id".to_string(), "title".to_string()],
        };
        assert_eq!(load.select_list(), "id, title, user_id");
    }

    #[test]
    fn test_select_list_star() {
        let load = EagerLoad {
            relation: &POSTS,
            columns: vec!["*".to_string()],
        };
        assert_eq!(load.select_list(), "*");
    }

    #[test]
    fn test_keys_normalize_across_types() {
        assert_eq!(key_of(&SqlValue::Int(3)), key_of(&SqlValue::from("3")));
    }
}
