//! Core traits and value types for the ORM layer
//!
//! Record types describe themselves to the compiler through [`DatabaseEntity`].
//! Values travelling into SQL are always [`SqlValue`]s bound as parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use super::builder::EntityQuery;
use crate::error::{RepositoryError, Result};

/// Free-form payload handed to [`DatabaseEntity::apply_filter`].
pub type FilterInput = Map<String, JsonValue>;

/// How primary keys are produced on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// The store assigns an INTEGER rowid.
    AutoIncrement,
    /// A v4 UUID string is generated when the input has no key.
    Uuid,
    /// The caller always supplies the key.
    Manual,
}

/// Whether a relation yields one related row or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    One,
    Many,
}

/// Static description of a named relation.
///
/// `related_key` lives on `table`, `parent_key` lives on the owning entity;
/// rows are related when the two are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDef {
    pub name: &'static str,
    pub table: &'static str,
    pub related_key: &'static str,
    pub parent_key: &'static str,
    pub kind: RelationKind,
}

impl RelationDef {
    /// Related rows point back at this entity through `foreign_key`.
    pub const fn has_many(
        name: &'static str,
        table: &'static str,
        foreign_key: &'static str,
        local_key: &'static str,
    ) -> Self {
        Self {
            name,
            table,
            related_key: foreign_key,
            parent_key: local_key,
            kind: RelationKind::Many,
        }
    }

    pub const fn has_one(
        name: &'static str,
        table: &'static str,
        foreign_key: &'static str,
        local_key: &'static str,
    ) -> Self {
        Self {
            name,
            table,
            related_key: foreign_key,
            parent_key: local_key,
            kind: RelationKind::One,
        }
    }

    /// This entity points at the related row through `foreign_key`.
    pub const fn belongs_to(
        name: &'static str,
        table: &'static str,
        foreign_key: &'static str,
        owner_key: &'static str,
    ) -> Self {
        Self {
            name,
            table,
            related_key: owner_key,
            parent_key: foreign_key,
            kind: RelationKind::One,
        }
    }
}

/// Metadata about a database entity (table).
///
/// One implementation per record type; the repository and the condition
/// compiler are generic over it.
pub trait DatabaseEntity: Sized + Send + Sync + 'static {
    /// The SQL table name (e.g., "users")
    const TABLE_NAME: &'static str;

    /// The primary key column name
    const PRIMARY_KEY: &'static str = "id";

    /// How new primary keys are produced
    const KEY_KIND: KeyKind = KeyKind::AutoIncrement;

    /// Maintain `created_at` / `updated_at` on writes
    const TIMESTAMPS: bool = false;

    /// Default sort column for `all()`
    const DEFAULT_SORT: &'static str = "id";

    /// Default sort direction
    const DEFAULT_SORT_DIR: OrderDirection = OrderDirection::Asc;

    /// Relations that can be eager-loaded or used in existence tests.
    fn relations() -> &'static [RelationDef] {
        &[]
    }

    fn relation(name: &str) -> Result<&'static RelationDef> {
        Self::relations()
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                RepositoryError::validation(format!(
                    "{} has no relation named '{}'",
                    Self::TABLE_NAME,
                    name
                ))
            })
    }

    /// Record-type specific filtering hook used by the `filter` option.
    ///
    /// Entities without a filter scope reject the option with `Validation`.
    fn apply_filter(_query: EntityQuery<Self>, _filter: &FilterInput) -> Result<EntityQuery<Self>> {
        Err(RepositoryError::validation(format!(
            "{} does not support the filter option",
            Self::TABLE_NAME
        )))
    }
}

/// Sort direction for ORDER BY clauses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Ascending order (A-Z, 1-9, oldest-newest)
    #[default]
    Asc,
    /// Descending order (Z-A, 9-1, newest-oldest)
    Desc,
}

impl OrderDirection {
    /// Convert to SQL order string
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(RepositoryError::validation(format!(
                "sort direction must be asc or desc, got '{}'",
                other
            ))),
        }
    }
}

/// Represents a SQL value that can be bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Bind this value to a sqlx query
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    /// Bind this value to a scalar query (COUNT, EXISTS)
    pub fn bind_to_scalar<'q, O: Send + Unpin>(
        &'q self,
        query: sqlx::query::QueryScalar<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::QueryScalar<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    /// Convert a JSON scalar. Arrays and objects are stored as JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => SqlValue::String(s.clone()),
            other => SqlValue::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::String(s) => JsonValue::String(s.clone()),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Null => JsonValue::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Value equality as the store sees it (booleans are 0/1, ints equal floats).
    pub fn loosely_eq(&self, other: &SqlValue) -> bool {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::String(s) => write!(f, "{}", s),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Null => write!(f, "NULL"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        SqlValue::from_json(&v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(SqlValue::from_json(&json!(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from_json(&json!("a")), SqlValue::from("a"));
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from_json(&json!([1, 2])),
            SqlValue::String("[1,2]".to_string())
        );
    }

    #[test]
    fn test_loose_equality() {
        assert!(SqlValue::Bool(true).loosely_eq(&SqlValue::Int(1)));
        assert!(SqlValue::Int(2).loosely_eq(&SqlValue::Float(2.0)));
        assert!(!SqlValue::from("2").loosely_eq(&SqlValue::Int(2)));
    }

    #[test]
    fn test_order_direction_parse() {
        assert_eq!(OrderDirection::parse("DESC").unwrap(), OrderDirection::Desc);
        assert_eq!(OrderDirection::parse("asc").unwrap().to_sql(), "ASC");
        assert!(OrderDirection::parse("sideways").is_err());
    }

    #[test]
    fn test_belongs_to_keys() {
        let rel = RelationDef::belongs_to("author", "users", "user_id", "id");
        assert_eq!(rel.parent_key, "user_id");
        assert_eq!(rel.related_key, "id");
        assert_eq!(rel.kind, RelationKind::One);
    }
}
