//! List options ("other" map)
//!
//! Sorting, eager-loading, joins and record filters are ordered steps applied
//! after the condition. Pagination is kept apart from the steps so it is
//! always the last thing applied, whatever order the caller wrote the map in.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::pagination::Pagination;
use super::traits::{FilterInput, OrderDirection};
use crate::error::{RepositoryError, Result};

pub const KEY_SORT: &str = "sort";
pub const KEY_RELATE: &str = "relate";
pub const KEY_JOIN: &str = "join";
pub const KEY_FILTER: &str = "filter";
pub const KEY_PAGINATE: &str = "paginate";

/// Join kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

/// `<type> JOIN table ON foreign_key = primary_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDescriptor {
    #[serde(rename = "table_name")]
    pub table: String,
    pub foreign_key: String,
    pub primary_key: String,
    #[serde(rename = "type", default)]
    pub kind: JoinType,
}

impl JoinDescriptor {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        primary_key: impl Into<String>,
        kind: JoinType,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            primary_key: primary_key.into(),
            kind,
        }
    }
}

/// Relation to eager-load with its column projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub relationship_name: String,
    pub relationship_select: Vec<String>,
}

impl RelationDescriptor {
    pub fn new<S: Into<String>>(name: impl Into<String>, select: impl IntoIterator<Item = S>) -> Self {
        Self {
            relationship_name: name.into(),
            relationship_select: select.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: OrderDirection,
}

/// One non-terminal list step.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOption {
    Sort(Vec<SortKey>),
    Relate(Vec<RelationDescriptor>),
    /// `forced` replaces every descriptor's own join type.
    Join {
        joins: Vec<JoinDescriptor>,
        forced: Option<JoinType>,
    },
    Filter(FilterInput),
}

/// Ordered list steps plus an optional terminal pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    steps: Vec<QueryOption>,
    pagination: Option<Pagination>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.steps.push(QueryOption::Sort(vec![SortKey {
            column: column.into(),
            direction,
        }]));
        self
    }

    pub fn relate(mut self, relations: Vec<RelationDescriptor>) -> Self {
        self.steps.push(QueryOption::Relate(relations));
        self
    }

    pub fn join(mut self, joins: Vec<JoinDescriptor>) -> Self {
        self.steps.push(QueryOption::Join { joins, forced: None });
        self
    }

    /// Join with every descriptor forced to `kind`.
    pub fn join_as(mut self, joins: Vec<JoinDescriptor>, kind: JoinType) -> Self {
        self.steps.push(QueryOption::Join {
            joins,
            forced: Some(kind),
        });
        self
    }

    pub fn filter(mut self, filter: FilterInput) -> Self {
        self.steps.push(QueryOption::Filter(filter));
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn steps(&self) -> &[QueryOption] {
        &self.steps
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    /// Parse the declarative JSON form, e.g.
    /// `{"paginate": {"page": 1, "page_size": 20}, "sort": {"name": "asc"}}`.
    pub fn from_json(input: &JsonValue) -> Result<Self> {
        let map = match input {
            JsonValue::Null => return Ok(Self::new()),
            JsonValue::Object(map) => map,
            _ => return Err(RepositoryError::validation("options must be an object")),
        };

        let entries: Vec<(String, JsonValue)> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let entries = move_item_to_last(entries, KEY_PAGINATE);

        let mut options = Self::new();
        for (key, payload) in entries {
            match key.as_str() {
                KEY_SORT => options.steps.push(QueryOption::Sort(parse_sort(&payload)?)),
                KEY_RELATE => options.steps.push(QueryOption::Relate(parse_payload(KEY_RELATE, payload)?)),
                KEY_JOIN => options.steps.push(QueryOption::Join {
                    joins: parse_payload(KEY_JOIN, payload)?,
                    forced: None,
                }),
                KEY_FILTER => match payload {
                    JsonValue::Object(filter) => options.steps.push(QueryOption::Filter(filter)),
                    _ => return Err(RepositoryError::validation("filter must be an object")),
                },
                KEY_PAGINATE => {
                    let requested: Pagination = parse_payload(KEY_PAGINATE, payload)?;
                    options.pagination = Some(Pagination::new(requested.page, requested.page_size)?);
                }
                other => {
                    return Err(RepositoryError::validation(format!(
                        "unknown list option '{}'",
                        other
                    )));
                }
            }
        }
        Ok(options)
    }
}

impl TryFrom<&JsonValue> for ListOptions {
    type Error = RepositoryError;

    fn try_from(value: &JsonValue) -> Result<Self> {
        Self::from_json(value)
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(key: &str, payload: JsonValue) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| RepositoryError::validation(format!("invalid {} payload: {}", key, e)))
}

fn parse_sort(payload: &JsonValue) -> Result<Vec<SortKey>> {
    let map = payload
        .as_object()
        .ok_or_else(|| RepositoryError::validation("sort must be an object of column: direction"))?;
    map.iter()
        .map(|(column, direction)| {
            let direction = direction
                .as_str()
                .ok_or_else(|| RepositoryError::validation(format!("sort direction for '{}' must be a string", column)))?;
            Ok(SortKey {
                column: column.clone(),
                direction: OrderDirection::parse(direction)?,
            })
        })
        .collect()
}

/// Move the entry named `key` to the end, keeping every other entry in place.
///
/// Single-entry inputs and inputs without `key` are returned unchanged.
pub fn move_item_to_last<V>(mut entries: Vec<(String, V)>, key: &str) -> Vec<(String, V)> {
    if entries.len() > 1 {
        if let Some(pos) = entries.iter().position(|(k, _)| k == key) {
            let item = entries.remove(pos);
            entries.push(item);
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn keys(entries: &[(String, i32)]) -> Vec<&str> {
        entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_move_item_to_last_preserves_others() {
        let entries = vec![
            ("paginate".to_string(), 1),
            ("sort".to_string(), 2),
            ("join".to_string(), 3),
        ];
        let moved = move_item_to_last(entries, KEY_PAGINATE);
        assert_eq!(keys(&moved), vec!["sort", "join", "paginate"]);
        assert_eq!(moved[2].1, 1);
    }

    #[test]
    fn test_move_item_to_last_noops() {
        let single = vec![("paginate".to_string(), 1)];
        assert_eq!(keys(&move_item_to_last(single, KEY_PAGINATE)), vec!["paginate"]);

        let absent = vec![("sort".to_string(), 1), ("join".to_string(), 2)];
        assert_eq!(keys(&move_item_to_last(absent, KEY_PAGINATE)), vec!["sort", "join"]);
    }

    #[test]
    fn test_from_json_keeps_pagination_terminal() {
        let options = ListOptions::from_json(&json!({
            "paginate": { "page": 2, "page_size": 5 },
            "sort": { "name": "desc", "id": "asc" },
            "relate": [{ "relationship_name": "posts", "relationship_select": ["id", "title"] }],
        }))
        .unwrap();

        assert_eq!(options.pagination(), Some(Pagination { page: 2, page_size: 5 }));
        assert_eq!(options.steps().len(), 2);
        assert_matches!(&options.steps()[0], QueryOption::Sort(keys) if keys.len() == 2 && keys[0].column == "name");
        assert_matches!(&options.steps()[1], QueryOption::Relate(rels) if rels[0].relationship_name == "posts");
    }

    #[test]
    fn test_join_payload() {
        let options = ListOptions::from_json(&json!({
            "join": [{
                "table_name": "teams",
                "foreign_key": "users.team_id",
                "primary_key": "teams.id",
                "type": "left"
            }]
        }))
        .unwrap();
        assert_matches!(
            &options.steps()[0],
            QueryOption::Join { joins, forced: None } if joins[0].kind == JoinType::Left && joins[0].table == "teams"
        );
    }

    #[test]
    fn test_pagination_requires_both_keys() {
        let err = ListOptions::from_json(&json!({ "paginate": { "page": 1 } })).unwrap_err();
        assert_matches!(err, RepositoryError::Validation(_));
    }

    #[test]
    fn test_relation_requires_select() {
        let err = ListOptions::from_json(&json!({ "relate": [{ "relationship_name": "posts" }] })).unwrap_err();
        assert_matches!(err, RepositoryError::Validation(_));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ListOptions::from_json(&json!({ "explode": true })).unwrap_err();
        assert_matches!(err, RepositoryError::Validation(_));
    }

    #[test]
    fn test_builder_form() {
        let options = ListOptions::new()
            .paginate(Pagination::new(1, 10).unwrap())
            .sort("id", OrderDirection::Desc)
            .join_as(vec![JoinDescriptor::new("teams", "users.team_id", "teams.id", JoinType::Inner)], JoinType::Left);
        assert_eq!(options.steps().len(), 2);
        assert!(options.pagination().is_some());
    }
}
