//! Condition compiler
//!
//! A [`Condition`] is an ordered list of `column → predicate` entries. Each
//! entry whose value is present is compiled into the query's [`Predicates`];
//! entries without a value are skipped, which lets callers pass optional
//! search fields straight through.
//!
//! Conditions can be built fluently or parsed from the declarative JSON form:
//!
//! ```json
//! {
//!   "status": { "operator": "where_in", "value": [1, 2] },
//!   "name":   { "operator": "where_like", "value": "ali" },
//!   "title":  { "operator": "where_has", "value": "Intro", "relationship_name": "posts" },
//!   "age":    { "operator": ">=", "value": 18 }
//! }
//! ```

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::predicates::{Boolean, Comparison, Predicates};
use super::traits::{DatabaseEntity, SqlValue};
use crate::db::sqlite_helpers::ensure_identifier;
use crate::error::{RepositoryError, Result};

pub const KEY_OPERATOR: &str = "operator";
pub const KEY_VALUE: &str = "value";
pub const KEY_RELATIONSHIP_NAME: &str = "relationship_name";
pub const KEY_RELATIONSHIP_SELECT: &str = "relationship_select";

pub const OP_OR_WHERE_IN: &str = "or_where_in";
pub const OP_OR_WHERE_NOT_IN: &str = "or_where_not_in";
pub const OP_OR_WHERE_BETWEEN: &str = "or_where_between";
pub const OP_OR_WHERE_NOT_BETWEEN: &str = "or_where_not_between";
pub const OP_OR_WHERE_NULL: &str = "or_where_null";
pub const OP_OR_WHERE_NOT_NULL: &str = "or_where_not_null";
pub const OP_OR_WHERE: &str = "or_where";
pub const OP_WHERE_IN: &str = "where_in";
pub const OP_WHERE_NOT_IN: &str = "where_not_in";
pub const OP_WHERE_BETWEEN: &str = "where_between";
pub const OP_WHERE_NOT_BETWEEN: &str = "where_not_between";
pub const OP_WHERE_NULL: &str = "where_null";
pub const OP_WHERE_NOT_NULL: &str = "where_not_null";
pub const OP_WHERE_DATE: &str = "where_date";
pub const OP_WHERE_DATE_LESS: &str = "where_date_less";
pub const OP_WHERE_HAS: &str = "where_has";
pub const OP_WHERE_HAS_LIKE: &str = "where_has_like";
pub const OP_WHERE_HAS_BETWEEN: &str = "where_has_like_between";
pub const OP_WHERE_IN_OR_NULL: &str = "where_in_column_or_null";
pub const OP_WHERE_IN_AND_NOT_NULL: &str = "where_in_column_and_not_null";
pub const OP_LIKE_OR_WHERE: &str = "where_like_or_where";
pub const OP_LIKE_WHERE: &str = "where_like";
pub const OP_CASE_WHERE_NULL_OR_BETWEEN: &str = "case_where_null_or_between";

static DATE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2}/\d{2}/\d{4}\s-\s\d{2}/\d{2}/\d{4}$").expect("date range pattern is valid")
});

/// One operator with the payload it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    In(Vec<SqlValue>),
    OrIn(Vec<SqlValue>),
    NotIn(Vec<SqlValue>),
    OrNotIn(Vec<SqlValue>),
    Between(SqlValue, SqlValue),
    OrBetween(SqlValue, SqlValue),
    NotBetween(SqlValue, SqlValue),
    OrNotBetween(SqlValue, SqlValue),
    Null,
    OrNull,
    NotNull,
    OrNotNull,
    /// `OR column = value`
    OrEq(SqlValue),
    /// `column <op> value`
    Compare(Comparison, SqlValue),
    /// `DATE(column) = value`
    Date(SqlValue),
    /// `DATE(column) <= value`
    DateUntil(SqlValue),
    Like(String),
    OrLike(String),
    /// Related row exists with `column = value`
    Has { relation: String, value: SqlValue },
    /// Related row exists with `column LIKE %text%`
    HasLike { relation: String, text: String },
    /// Related row exists with `column BETWEEN low AND high`
    HasBetween {
        relation: String,
        low: SqlValue,
        high: SqlValue,
    },
    /// `AND (column IN (..) OR column IS NULL)`
    InOrNull(Vec<SqlValue>),
    /// `OR (column IN (..) AND column IS NOT NULL)`
    OrInAndNotNull(Vec<SqlValue>),
    /// Row was active on the given date, judged by `entry_at` / `leave_at`.
    ActiveOn(SqlValue),
}

impl Predicate {
    pub fn eq(value: impl Into<SqlValue>) -> Self {
        Self::Compare(Comparison::Eq, value.into())
    }

    pub fn compare(op: Comparison, value: impl Into<SqlValue>) -> Self {
        Self::Compare(op, value.into())
    }

    pub fn in_list<T: Into<SqlValue>>(values: impl IntoIterator<Item = T>) -> Self {
        Self::In(values.into_iter().map(Into::into).collect())
    }

    pub fn like(text: impl Into<String>) -> Self {
        Self::Like(text.into())
    }

    pub fn between(low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Self {
        Self::Between(low.into(), high.into())
    }

    /// Build a predicate from its wire name and the raw entry.
    ///
    /// `value` must already be known to be present.
    pub fn from_wire(operator: &str, value: &JsonValue, entry: &JsonValue) -> Result<Self> {
        let predicate = match operator {
            OP_OR_WHERE_IN => Self::OrIn(list_of(value)),
            OP_OR_WHERE_NOT_IN => Self::OrNotIn(list_of(value)),
            OP_OR_WHERE_BETWEEN => {
                let (low, high) = pair_of(operator, value)?;
                Self::OrBetween(low, high)
            }
            OP_OR_WHERE_NOT_BETWEEN => {
                let (low, high) = pair_of(operator, value)?;
                Self::OrNotBetween(low, high)
            }
            OP_OR_WHERE_NULL => Self::OrNull,
            OP_OR_WHERE_NOT_NULL => Self::OrNotNull,
            OP_OR_WHERE => Self::OrEq(SqlValue::from_json(value)),
            OP_WHERE_IN => Self::In(list_of(value)),
            OP_WHERE_NOT_IN => Self::NotIn(list_of(value)),
            OP_WHERE_BETWEEN => {
                let (low, high) = pair_of(operator, value)?;
                Self::Between(low, high)
            }
            OP_WHERE_NOT_BETWEEN => {
                let (low, high) = pair_of(operator, value)?;
                Self::NotBetween(low, high)
            }
            OP_WHERE_NULL => Self::Null,
            OP_WHERE_NOT_NULL => Self::NotNull,
            OP_WHERE_DATE => Self::Date(SqlValue::from_json(value)),
            OP_WHERE_DATE_LESS => Self::DateUntil(SqlValue::from_json(value)),
            OP_WHERE_HAS => Self::Has {
                relation: relation_of(operator, entry)?,
                value: SqlValue::from_json(value),
            },
            OP_WHERE_HAS_LIKE => Self::HasLike {
                relation: relation_of(operator, entry)?,
                text: text_of(value),
            },
            OP_WHERE_HAS_BETWEEN => {
                let (low, high) = match value {
                    JsonValue::String(s) => {
                        let (start, end) = parse_date_range(s)?;
                        (SqlValue::String(start), SqlValue::String(end))
                    }
                    other => pair_of(operator, other)?,
                };
                Self::HasBetween {
                    relation: relation_of(operator, entry)?,
                    low,
                    high,
                }
            }
            OP_WHERE_IN_OR_NULL => Self::InOrNull(list_of(value)),
            OP_WHERE_IN_AND_NOT_NULL => Self::OrInAndNotNull(list_of(value)),
            OP_LIKE_OR_WHERE => Self::OrLike(text_of(value)),
            OP_LIKE_WHERE => Self::Like(text_of(value)),
            OP_CASE_WHERE_NULL_OR_BETWEEN => Self::ActiveOn(SqlValue::from_json(value)),
            raw => Self::Compare(Comparison::parse(raw)?, SqlValue::from_json(value)),
        };
        Ok(predicate)
    }
}

fn list_of(value: &JsonValue) -> Vec<SqlValue> {
    match value {
        JsonValue::Array(items) => items.iter().map(SqlValue::from_json).collect(),
        scalar => vec![SqlValue::from_json(scalar)],
    }
}

fn pair_of(operator: &str, value: &JsonValue) -> Result<(SqlValue, SqlValue)> {
    match value {
        JsonValue::Array(items) if items.len() == 2 => {
            Ok((SqlValue::from_json(&items[0]), SqlValue::from_json(&items[1])))
        }
        _ => Err(RepositoryError::validation(format!(
            "{} expects a [low, high] pair",
            operator
        ))),
    }
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn relation_of(operator: &str, entry: &JsonValue) -> Result<String> {
    entry
        .get(KEY_RELATIONSHIP_NAME)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            RepositoryError::validation(format!("{} requires {}", operator, KEY_RELATIONSHIP_NAME))
        })
}

/// Parse `dd/mm/YYYY - dd/mm/YYYY` into whole-day timestamps.
pub fn parse_date_range(input: &str) -> Result<(String, String)> {
    let invalid = || RepositoryError::validation(format!("'{}' is not a dd/mm/YYYY - dd/mm/YYYY range", input));
    if !DATE_RANGE.is_match(input) {
        return Err(invalid());
    }
    let (start, end) = input.split_once('-').ok_or_else(invalid)?;
    let start = NaiveDate::parse_from_str(start.trim(), "%d/%m/%Y").map_err(|_| invalid())?;
    let end = NaiveDate::parse_from_str(end.trim(), "%d/%m/%Y").map_err(|_| invalid())?;
    Ok((
        format!("{} 00:00:00", start.format("%Y-%m-%d")),
        format!("{} 23:59:59", end.format("%Y-%m-%d")),
    ))
}

/// A column and its predicate; `None` means the value was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionEntry {
    pub column: String,
    pub predicate: Option<Predicate>,
}

/// Ordered condition map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    entries: Vec<ConditionEntry>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn with(mut self, column: impl Into<String>, predicate: Predicate) -> Self {
        self.entries.push(ConditionEntry {
            column: column.into(),
            predicate: Some(predicate),
        });
        self
    }

    /// Append an entry that is skipped when `predicate` is `None`.
    pub fn with_optional(mut self, column: impl Into<String>, predicate: Option<Predicate>) -> Self {
        self.entries.push(ConditionEntry {
            column: column.into(),
            predicate,
        });
        self
    }

    /// Equality condition for each `(column, value)` pair.
    pub fn equalities<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |c, (k, v)| c.with(k, Predicate::eq(v)))
    }

    pub fn entries(&self) -> &[ConditionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the declarative JSON form. Entries without a `value` (or with a
    /// JSON `null` value) are kept but compile to nothing.
    pub fn from_json(input: &JsonValue) -> Result<Self> {
        let map = match input {
            JsonValue::Null => return Ok(Self::new()),
            JsonValue::Object(map) => map,
            _ => return Err(RepositoryError::validation("condition must be an object")),
        };

        let mut condition = Self::new();
        for (column, entry) in map {
            let value = entry.get(KEY_VALUE).filter(|v| !v.is_null());
            let predicate = match value {
                None => None,
                Some(value) => {
                    let operator = entry
                        .get(KEY_OPERATOR)
                        .and_then(JsonValue::as_str)
                        .ok_or_else(|| {
                            RepositoryError::validation(format!(
                                "condition on '{}' has no operator",
                                column
                            ))
                        })?;
                    Some(Predicate::from_wire(operator, value, entry)?)
                }
            };
            condition = condition.with_optional(column.clone(), predicate);
        }
        Ok(condition)
    }
}

impl TryFrom<&JsonValue> for Condition {
    type Error = RepositoryError;

    fn try_from(value: &JsonValue) -> Result<Self> {
        Self::from_json(value)
    }
}

/// Compile `condition` into `predicates` for entity `E`.
pub fn apply_condition<E: DatabaseEntity>(predicates: &mut Predicates, condition: &Condition) -> Result<()> {
    for entry in condition.entries() {
        let Some(predicate) = &entry.predicate else {
            tracing::trace!(table = E::TABLE_NAME, column = %entry.column, "Skipping condition without value");
            continue;
        };
        let column = ensure_identifier(&entry.column)?;
        apply_predicate::<E>(predicates, column, predicate)?;
    }
    Ok(())
}

fn apply_predicate<E: DatabaseEntity>(p: &mut Predicates, column: &str, predicate: &Predicate) -> Result<()> {
    match predicate {
        Predicate::OrIn(values) => {
            p.or_where_in(column, values.clone());
        }
        Predicate::OrNotIn(values) => {
            p.or_where_not_in(column, values.clone());
        }
        Predicate::OrBetween(low, high) => {
            p.between(Boolean::Or, column, low.clone(), high.clone(), false);
        }
        Predicate::OrNotBetween(low, high) => {
            p.between(Boolean::Or, column, low.clone(), high.clone(), true);
        }
        Predicate::OrNull => {
            p.or_where_null(column);
        }
        Predicate::OrNotNull => {
            p.or_where_not_null(column);
        }
        Predicate::OrEq(value) => {
            p.or_where_eq(column, value.clone());
        }
        Predicate::In(values) => {
            p.where_in(column, values.clone());
        }
        Predicate::NotIn(values) => {
            p.where_not_in(column, values.clone());
        }
        Predicate::Between(low, high) => {
            p.between(Boolean::And, column, low.clone(), high.clone(), false);
        }
        Predicate::NotBetween(low, high) => {
            p.between(Boolean::And, column, low.clone(), high.clone(), true);
        }
        Predicate::Null => {
            p.where_null(column);
        }
        Predicate::NotNull => {
            p.where_not_null(column);
        }
        Predicate::Date(value) => {
            p.where_date(column, Comparison::Eq, value.clone());
        }
        Predicate::DateUntil(value) => {
            p.where_date(column, Comparison::Lte, value.clone());
        }
        Predicate::Has { relation, value } => {
            let rel = E::relation(relation)?;
            p.where_has(E::TABLE_NAME, rel, |q| {
                q.where_eq(column, value.clone());
            });
        }
        Predicate::HasLike { relation, text } => {
            let rel = E::relation(relation)?;
            p.where_has(E::TABLE_NAME, rel, |q| {
                q.where_like(column, text);
            });
        }
        Predicate::HasBetween { relation, low, high } => {
            let rel = E::relation(relation)?;
            p.where_has(E::TABLE_NAME, rel, |q| {
                q.where_between(column, low.clone(), high.clone());
            });
        }
        Predicate::InOrNull(values) => {
            p.where_group(|q| {
                q.where_in(column, values.clone()).or_where_null(column);
            });
        }
        Predicate::OrInAndNotNull(values) => {
            p.or_where_group(|q| {
                q.where_in(column, values.clone()).where_not_null(column);
            });
        }
        Predicate::OrLike(text) => {
            p.or_where_like(column, text);
        }
        Predicate::Like(text) => {
            p.where_like(column, text);
        }
        Predicate::ActiveOn(date) => {
            let t = E::TABLE_NAME;
            p.where_raw(
                format!(
                    "(CASE WHEN {t}.leave_at IS NOT NULL \
                     THEN DATE({t}.entry_at) <= ? AND DATE({t}.leave_at) >= ? \
                     ELSE DATE({t}.entry_at) <= ? END)"
                ),
                vec![date.clone(), date.clone(), date.clone()],
            );
        }
        Predicate::Compare(op, value) => {
            p.where_compare(column, *op, value.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::traits::RelationDef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Customer;

    impl DatabaseEntity for Customer {
        const TABLE_NAME: &'static str = "customers";

        fn relations() -> &'static [RelationDef] {
            const RELATIONS: &[RelationDef] = &[RelationDef::has_many("orders", "orders", "customer_id", "id")];
            RELATIONS
        }
    }

    fn compile(input: serde_json::Value) -> Result<Predicates> {
        let condition = Condition::from_json(&input)?;
        let mut p = Predicates::new();
        apply_condition::<Customer>(&mut p, &condition)?;
        Ok(p)
    }

    #[test]
    fn test_absent_values_add_nothing() {
        let p = compile(json!({
            "status": { "operator": "where_in" },
            "name": { "operator": "where_like", "value": null },
        }))
        .unwrap();
        assert!(p.is_empty());
        assert_eq!(p.to_sql(), None);
    }

    #[test]
    fn test_entries_compile_in_map_order() {
        let p = compile(json!({
            "status": { "operator": "where_in", "value": [1, 2] },
            "age": { "operator": ">=", "value": 18 },
            "nickname": { "operator": "or_where_null", "value": true },
        }))
        .unwrap();
        assert_eq!(
            p.to_sql().unwrap(),
            "status IN (?, ?) AND age >= ? OR nickname IS NULL"
        );
        assert_eq!(
            p.bindings(),
            vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(18)]
        );
    }

    #[test]
    fn test_between_and_dates() {
        let p = compile(json!({
            "score": { "operator": "where_not_between", "value": [10, 20] },
            "created_at": { "operator": "where_date", "value": "2024-03-01" },
            "updated_at": { "operator": "where_date_less", "value": "2024-03-31" },
        }))
        .unwrap();
        assert_eq!(
            p.to_sql().unwrap(),
            "score NOT BETWEEN ? AND ? AND DATE(created_at) = ? AND DATE(updated_at) <= ?"
        );
    }

    #[test]
    fn test_between_requires_pair() {
        let err = compile(json!({ "score": { "operator": "where_between", "value": [1] } })).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_relation_existence() {
        let p = compile(json!({
            "total": { "operator": "where_has", "value": 5, "relationship_name": "orders" },
        }))
        .unwrap();
        assert_eq!(
            p.to_sql().unwrap(),
            "EXISTS (SELECT 1 FROM orders WHERE orders.customer_id = customers.id AND (total = ?))"
        );
    }

    #[test]
    fn test_relation_between_accepts_date_range() {
        let p = compile(json!({
            "ordered_at": {
                "operator": "where_has_like_between",
                "value": "01/02/2024 - 29/02/2024",
                "relationship_name": "orders"
            },
        }))
        .unwrap();
        assert_eq!(
            p.bindings(),
            vec![
                SqlValue::from("2024-02-01 00:00:00"),
                SqlValue::from("2024-02-29 23:59:59")
            ]
        );
    }

    #[test]
    fn test_unknown_relation_rejected() {
        let err = compile(json!({
            "x": { "operator": "where_has", "value": 1, "relationship_name": "ghosts" },
        }))
        .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_missing_relationship_name_rejected() {
        let err = compile(json!({ "x": { "operator": "where_has_like", "value": "a" } })).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_compound_null_groups() {
        let p = compile(json!({
            "group_id": { "operator": "where_in_column_or_null", "value": [3] },
            "team_id": { "operator": "where_in_column_and_not_null", "value": [4] },
        }))
        .unwrap();
        assert_eq!(
            p.to_sql().unwrap(),
            "(group_id IN (?) OR group_id IS NULL) OR (team_id IN (?) AND team_id IS NOT NULL)"
        );
    }

    #[test]
    fn test_active_on_binds_date_three_times() {
        let p = compile(json!({
            "entry_at": { "operator": "case_where_null_or_between", "value": "2024-05-01" },
        }))
        .unwrap();
        let sql = p.to_sql().unwrap();
        assert!(sql.starts_with("(CASE WHEN customers.leave_at IS NOT NULL"));
        assert_eq!(p.bindings(), vec![SqlValue::from("2024-05-01"); 3]);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = compile(json!({ "a": { "operator": "where_magic", "value": 1 } })).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_unsafe_column_rejected() {
        let err = compile(json!({ "a = 1 OR 1": { "operator": "=", "value": 1 } })).unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_like_variants_escape() {
        let p = compile(json!({
            "name": { "operator": "where_like", "value": "a_b" },
            "email": { "operator": "where_like_or_where", "value": "x" },
        }))
        .unwrap();
        assert_eq!(
            p.to_sql().unwrap(),
            "name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\'"
        );
        assert_eq!(
            p.bindings(),
            vec![SqlValue::from("%a\\_b%"), SqlValue::from("%x%")]
        );
    }

    #[test]
    fn test_fluent_condition_matches_wire_form() {
        let fluent = Condition::new()
            .with("status", Predicate::in_list([1, 2]))
            .with_optional("name", None);
        let wire = Condition::from_json(&json!({
            "status": { "operator": "where_in", "value": [1, 2] },
            "name": { "operator": "where_like" },
        }))
        .unwrap();
        assert_eq!(fluent, wire);
    }

    #[test]
    fn test_parse_date_range_rejects_garbage() {
        assert!(parse_date_range("2024-01-01 - 2024-02-01").is_err());
        assert!(parse_date_range("31/02/2024 - 01/03/2024").is_err());
    }
}
