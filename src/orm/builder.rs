//! SQL Query Builder
//!
//! [`EntityQuery`] accumulates projection, predicates, joins, sorts and
//! eager-load directives for one entity type and renders a parameterized
//! SELECT. Terminal methods take the builder by value, so a query is
//! materialized at most once.

use std::marker::PhantomData;

use sqlx::SqlitePool;

use super::condition::{Condition, apply_condition};
use super::options::{JoinDescriptor, JoinType, ListOptions, QueryOption, RelationDescriptor};
use super::pagination::{Paginated, Pagination};
use super::predicates::Predicates;
use super::record::Record;
use super::relations::{EagerLoad, load_eager};
use super::traits::{DatabaseEntity, OrderDirection, SqlValue};
use crate::db::sqlite_helpers::{decode_row, ensure_identifier};
use crate::error::{RepositoryError, Result};

/// A query builder for database entities.
pub struct EntityQuery<E: DatabaseEntity> {
    _phantom: PhantomData<E>,
    columns: Vec<String>,
    predicates: Predicates,
    joins: Vec<String>,
    order_clauses: Vec<String>,
    eager: Vec<EagerLoad>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<E: DatabaseEntity> EntityQuery<E> {
    /// Create a new query builder for the entity type.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
            columns: Vec::new(),
            predicates: Predicates::new(),
            joins: Vec::new(),
            order_clauses: Vec::new(),
            eager: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Restrict the projection. An empty list or `*` selects every column.
    pub fn select<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected = Vec::new();
        for column in columns {
            selected.push(ensure_identifier(column.as_ref())?.to_string());
        }
        self.columns = selected;
        Ok(self)
    }

    /// Compile a condition map into the WHERE clause.
    pub fn where_condition(mut self, condition: &Condition) -> Result<Self> {
        apply_condition::<E>(&mut self.predicates, condition)?;
        Ok(self)
    }

    /// Add predicates directly.
    pub fn filter_with<F: FnOnce(&mut Predicates)>(mut self, build: F) -> Self {
        build(&mut self.predicates);
        self
    }

    /// Append `<type> JOIN table ON foreign_key = primary_key`.
    ///
    /// `forced` overrides the descriptor's own join type.
    pub fn join(mut self, join: &JoinDescriptor, forced: Option<JoinType>) -> Result<Self> {
        let kind = forced.unwrap_or(join.kind);
        self.joins.push(format!(
            "{} {} ON {} = {}",
            kind.to_sql(),
            ensure_identifier(&join.table)?,
            ensure_identifier(&join.foreign_key)?,
            ensure_identifier(&join.primary_key)?,
        ));
        Ok(self)
    }

    /// Add sorting to the query; earlier calls are higher priority.
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Result<Self> {
        let column = ensure_identifier(column)?;
        self.order_clauses.push(format!("{} {}", column, direction.to_sql()));
        Ok(self)
    }

    /// Eager-load `relation`, projecting `columns` from it.
    pub fn with<I, S>(mut self, relation: &str, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let relation = E::relation(relation)?;
        let mut selected = Vec::new();
        for column in columns {
            selected.push(ensure_identifier(column.as_ref())?.to_string());
        }
        self.eager.push(EagerLoad {
            relation,
            columns: selected,
        });
        Ok(self)
    }

    /// Eager-load every described relation.
    pub fn relate(self, relations: &[RelationDescriptor]) -> Result<Self> {
        relations
            .iter()
            .try_fold(self, |q, rel| q.with(&rel.relationship_name, &rel.relationship_select))
    }

    /// Set limit directly.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set offset directly.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Apply one list step.
    pub fn apply_option(self, option: &QueryOption) -> Result<Self> {
        match option {
            QueryOption::Sort(keys) => keys
                .iter()
                .try_fold(self, |q, key| q.order_by(&key.column, key.direction)),
            QueryOption::Relate(relations) => self.relate(relations),
            QueryOption::Join { joins, forced } => joins
                .iter()
                .try_fold(self, |q, join| q.join(join, *forced)),
            QueryOption::Filter(filter) => E::apply_filter(self, filter),
        }
    }

    /// Apply every non-terminal step of `options`, in order.
    pub fn apply_options(self, options: &ListOptions) -> Result<Self> {
        options
            .steps()
            .iter()
            .try_fold(self, |q, option| q.apply_option(option))
    }

    /// Values in placeholder order.
    pub fn bindings(&self) -> Vec<SqlValue> {
        self.predicates.bindings()
    }

    fn from_clause(&self) -> String {
        let mut sql = format!(" FROM {}", E::TABLE_NAME);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(predicates) = self.predicates.to_sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates);
        }
        sql
    }

    /// Projection list. Eager loads need their parent key in every row, so a
    /// restricted projection gains `table.key` for any key it leaves out.
    fn projection(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        let own_star = format!("{}.*", E::TABLE_NAME);
        if self.columns.iter().any(|c| c == "*" || *c == own_star) {
            return self.columns.join(", ");
        }
        let mut columns = self.columns.clone();
        for load in &self.eager {
            let key = load.relation.parent_key;
            if !columns.iter().any(|c| output_name(c) == key) {
                columns.push(format!("{}.{}", E::TABLE_NAME, key));
            }
        }
        columns.join(", ")
    }

    /// Build the SELECT statement.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {}{}", self.projection(), self.from_clause());

        if !self.order_clauses.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_clauses.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset));
            }
            _ => {}
        }

        sql
    }

    /// Build the COUNT statement over the same joins and predicates.
    pub fn to_count_sql(&self) -> String {
        format!("SELECT COUNT(*){}", self.from_clause())
    }

    fn to_exists_sql(&self) -> String {
        format!("SELECT EXISTS(SELECT 1{})", self.from_clause())
    }

    /// Build a DELETE over the same predicates. Joins are not allowed here.
    pub fn to_delete_sql(&self) -> Result<String> {
        if !self.joins.is_empty() {
            return Err(RepositoryError::validation("cannot delete through a join"));
        }
        let mut sql = format!("DELETE FROM {}", E::TABLE_NAME);
        if let Some(predicates) = self.predicates.to_sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates);
        }
        Ok(sql)
    }

    // ========================================================================
    // Terminal operations
    // ========================================================================

    /// Execute the query and return all matching records.
    pub async fn fetch_all(self, pool: &SqlitePool) -> Result<Vec<Record>> {
        let sql = self.to_sql();
        let values = self.bindings();
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Executing entity query");

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = value.bind_to_query(query);
        }

        let rows = query.fetch_all(pool).await?;
        let mut records = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        load_eager(pool, &mut records, &self.eager).await?;
        Ok(records)
    }

    /// Execute the query and return the first record.
    pub async fn first(self, pool: &SqlitePool) -> Result<Option<Record>> {
        let records = self.limit(1).fetch_all(pool).await?;
        Ok(records.into_iter().next())
    }

    /// First record whose primary key is `id`, or [`RepositoryError::NotFound`].
    pub async fn find_or_fail(self, pool: &SqlitePool, id: impl Into<SqlValue>) -> Result<Record> {
        let id = id.into();
        let key = format!("{}.{}", E::TABLE_NAME, E::PRIMARY_KEY);
        self.filter_with(|p| {
            p.where_eq(&key, id.clone());
        })
        .first(pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found(E::TABLE_NAME, &id))
    }

    /// Execute a COUNT query.
    pub async fn count(&self, pool: &SqlitePool) -> Result<i64> {
        let sql = self.to_count_sql();
        let values = self.bindings();
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Executing count query");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &values {
            query = value.bind_to_scalar(query);
        }
        Ok(query.fetch_one(pool).await?)
    }

    /// True when at least one row matches.
    pub async fn exists(self, pool: &SqlitePool) -> Result<bool> {
        let sql = self.to_exists_sql();
        let values = self.bindings();
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Executing exists query");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &values {
            query = value.bind_to_scalar(query);
        }
        Ok(query.fetch_one(pool).await? != 0)
    }

    /// Count the full result, then fetch one page of it.
    pub async fn paginate(self, pool: &SqlitePool, pagination: Pagination) -> Result<Paginated<Record>> {
        let total = self.count(pool).await?;
        let items = self
            .limit(pagination.limit())
            .offset(pagination.offset())
            .fetch_all(pool)
            .await?;
        Ok(Paginated::new(items, total, pagination))
    }

    /// Delete every matching row; returns the number removed.
    pub async fn delete(self, pool: &SqlitePool) -> Result<u64> {
        let sql = self.to_delete_sql()?;
        let values = self.bindings();
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Executing delete");

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = value.bind_to_query(query);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }
}

impl<E: DatabaseEntity> Default for EntityQuery<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DatabaseEntity> std::fmt::Debug for EntityQuery<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQuery")
            .field("table", &E::TABLE_NAME)
            .field("sql", &self.to_sql())
            .field("bindings", &self.bindings())
            .finish()
    }
}

/// Name a projected column comes back under: the alias, else the bare column.
fn output_name(column: &str) -> &str {
    let lower = column.to_ascii_lowercase();
    if let Some(at) = lower.rfind(" as ") {
        return column[at + 4..].trim();
    }
    column.rsplit('.').next().unwrap_or(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::condition::Predicate;
    use crate::orm::traits::{FilterInput, RelationDef};
    use pretty_assertions::assert_eq;

    struct User;

    impl DatabaseEntity for User {
        const TABLE_NAME: &'static str = "users";

        fn relations() -> &'static [RelationDef] {
            const RELATIONS: &[RelationDef] = &[RelationDef::has_many("posts", "posts", "user_id", "id")];
            RELATIONS
        }
    }

    #[test]
    fn test_bare_query() {
        let q = EntityQuery::<User>::new();
        assert_eq!(q.to_sql(), "SELECT * FROM users");
        assert_eq!(q.to_count_sql(), "SELECT COUNT(*) FROM users");
    }

    #[test]
    fn test_full_query_shape() {
        let q = EntityQuery::<User>::new()
            .select(["users.id", "users.name", "teams.name as team"])
            .unwrap()
            .where_condition(&Condition::new().with("users.status", Predicate::in_list([1, 2])))
            .unwrap()
            .join(&JoinDescriptor::new("teams", "users.team_id", "teams.id", JoinType::Inner), None)
            .unwrap()
            .order_by("users.name", OrderDirection::Asc)
            .unwrap()
            .order_by("users.id", OrderDirection::Desc)
            .unwrap()
            .limit(10)
            .offset(20);

        assert_eq!(
            q.to_sql(),
            "SELECT users.id, users.name, teams.name as team FROM users \
             INNER JOIN teams ON users.team_id = teams.id \
             WHERE users.status IN (?, ?) ORDER BY users.name ASC, users.id DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            q.to_count_sql(),
            "SELECT COUNT(*) FROM users INNER JOIN teams ON users.team_id = teams.id WHERE users.status IN (?, ?)"
        );
    }

    #[test]
    fn test_forced_join_type() {
        let q = EntityQuery::<User>::new()
            .join(
                &JoinDescriptor::new("teams", "users.team_id", "teams.id", JoinType::Inner),
                Some(JoinType::Right),
            )
            .unwrap();
        assert_eq!(q.to_sql(), "SELECT * FROM users RIGHT JOIN teams ON users.team_id = teams.id");
    }

    #[test]
    fn test_offset_without_limit() {
        let q = EntityQuery::<User>::new().offset(5);
        assert_eq!(q.to_sql(), "SELECT * FROM users LIMIT -1 OFFSET 5");
    }

    #[test]
    fn test_relate_option_validates_relation() {
        let ok = EntityQuery::<User>::new().apply_option(&QueryOption::Relate(vec![RelationDescriptor::new(
            "posts",
            ["id"],
        )]));
        assert!(ok.is_ok());

        let err = EntityQuery::<User>::new()
            .apply_option(&QueryOption::Relate(vec![RelationDescriptor::new("likes", ["id"])]))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_eager_load_adds_parent_key() {
        let q = EntityQuery::<User>::new()
            .select(["name"])
            .unwrap()
            .with("posts", ["title"])
            .unwrap();
        assert_eq!(q.to_sql(), "SELECT name, users.id FROM users");

        let aliased = EntityQuery::<User>::new()
            .select(["users.name", "users.id as id"])
            .unwrap()
            .with("posts", ["title"])
            .unwrap();
        assert_eq!(aliased.to_sql(), "SELECT users.name, users.id as id FROM users");

        let starred = EntityQuery::<User>::new()
            .select(["users.*"])
            .unwrap()
            .with("posts", ["title"])
            .unwrap();
        assert_eq!(starred.to_sql(), "SELECT users.* FROM users");

        let plain = EntityQuery::<User>::new().select(["name"]).unwrap();
        assert_eq!(plain.to_sql(), "SELECT name FROM users");
    }

    #[test]
    fn test_output_name() {
        assert_eq!(output_name("users.id"), "id");
        assert_eq!(output_name("teams.name AS team"), "team");
        assert_eq!(output_name("name"), "name");
    }

    #[test]
    fn test_filter_without_hook_rejected() {
        let mut filter = FilterInput::new();
        filter.insert("active".to_string(), serde_json::json!(true));
        let err = EntityQuery::<User>::new()
            .apply_option(&QueryOption::Filter(filter))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(msg) if msg.contains("users")));
    }

    #[test]
    fn test_sort_rejects_bad_column() {
        let err = EntityQuery::<User>::new()
            .order_by("name; DROP TABLE users", OrderDirection::Asc)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[test]
    fn test_delete_through_join_rejected() {
        let q = EntityQuery::<User>::new()
            .join(&JoinDescriptor::new("teams", "users.team_id", "teams.id", JoinType::Inner), None)
            .unwrap();
        assert!(q.to_delete_sql().is_err());
    }
}
