//! Repository facade for entity data access
//!
//! [`Repository`] bundles the condition compiler, list options, eager loading
//! and pagination behind one entry point per entity type.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let users = db.repository::<UserEntity>();
//!
//! // Paginated list, newest first, with each user's posts
//! let condition = Condition::new()
//!     .with("status", Predicate::in_list([1, 2]))
//!     .with("name", Predicate::like("ann"));
//! let options = ListOptions::new()
//!     .sort("created_at", OrderDirection::Desc)
//!     .relate(vec![RelationDescriptor::new("posts", ["id", "title"])])
//!     .paginate(Pagination::new(1, 20)?);
//! let page = users.get_list(&["*"], &condition, &options).await?;
//!
//! // Write only what changed
//! let user = users.find_one_or_fail(7, &["*"], &Condition::new(), &[]).await?;
//! users.update(&user, Record::new().with("name", "Ann")).await?;
//! ```

use std::marker::PhantomData;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::SqlitePool;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use super::builder::EntityQuery;
use super::condition::Condition;
use super::options::{ListOptions, RelationDescriptor};
use super::pagination::Paginated;
use super::record::Record;
use super::traits::{DatabaseEntity, KeyKind, OrderDirection, SqlValue};
use crate::db::sqlite_helpers::{decode_row, ensure_identifier, now_timestamp, placeholders};
use crate::error::{RepositoryError, Result};

pub const COLUMN_CREATED_AT: &str = "created_at";
pub const COLUMN_UPDATED_AT: &str = "updated_at";

/// Result of [`Repository::get_list`]: plain rows, or a page when the
/// options asked for pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListResult {
    Rows(Vec<Record>),
    Page(Paginated<Record>),
}

impl ListResult {
    /// The rows carried by either variant.
    pub fn records(&self) -> &[Record] {
        match self {
            ListResult::Rows(rows) => rows,
            ListResult::Page(page) => &page.items,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            ListResult::Rows(rows) => rows,
            ListResult::Page(page) => page.items,
        }
    }
}

/// Generic data access for one entity type.
pub struct Repository<E: DatabaseEntity> {
    pool: SqlitePool,
    _marker: PhantomData<E>,
}

impl<E: DatabaseEntity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = value.bind_to_query(query);
    }
    query
}

fn default_order<E: DatabaseEntity>(order: Option<(&str, OrderDirection)>) -> (String, OrderDirection) {
    match order {
        Some((column, direction)) => (column.to_string(), direction),
        None => (E::DEFAULT_SORT.to_string(), E::DEFAULT_SORT_DIR),
    }
}

fn equalities(pairs: &[(&str, SqlValue)]) -> Condition {
    Condition::equalities(pairs.iter().map(|(column, value)| (*column, value.clone())))
}

impl<E: DatabaseEntity> Repository<E> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Log a failed write under `tag` and pass the result through.
    fn logged<T>(tag: &'static str, result: Result<T>) -> Result<T> {
        result.inspect_err(|e| tracing::error!(table = E::TABLE_NAME, error = %e, "[{}]: {}", tag, e))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// A fresh, unfiltered query.
    pub fn query(&self) -> EntityQuery<E> {
        EntityQuery::new()
    }

    /// Compile `condition` and every non-pagination option into an
    /// unexecuted query.
    pub fn list_query(&self, columns: &[&str], condition: &Condition, options: &ListOptions) -> Result<EntityQuery<E>> {
        self.query()
            .where_condition(condition)?
            .select(columns)?
            .apply_options(options)
    }

    /// Run a list query; paginated when `options` carries a pagination.
    pub async fn get_list(&self, columns: &[&str], condition: &Condition, options: &ListOptions) -> Result<ListResult> {
        let query = self.list_query(columns, condition, options)?;
        match options.pagination() {
            Some(pagination) => Ok(ListResult::Page(query.paginate(&self.pool, pagination).await?)),
            None => Ok(ListResult::Rows(query.fetch_all(&self.pool).await?)),
        }
    }

    /// First row matching `condition`, with `relations` eager-loaded.
    pub async fn get_detail(
        &self,
        condition: &Condition,
        columns: &[&str],
        relations: &[RelationDescriptor],
    ) -> Result<Option<Record>> {
        self.query()
            .where_condition(condition)?
            .select(columns)?
            .relate(relations)?
            .first(&self.pool)
            .await
    }

    /// Row with primary key `id` that also satisfies `condition`.
    pub async fn find_one_or_fail(
        &self,
        id: impl Into<SqlValue>,
        columns: &[&str],
        condition: &Condition,
        relations: &[RelationDescriptor],
    ) -> Result<Record> {
        self.query()
            .where_condition(condition)?
            .select(columns)?
            .relate(relations)?
            .find_or_fail(&self.pool, id)
            .await
    }

    /// Unexecuted query filtered by column equalities.
    pub fn get_by_condition(&self, pairs: &[(&str, SqlValue)], columns: &[&str]) -> Result<EntityQuery<E>> {
        self.query().select(columns)?.where_condition(&equalities(pairs))
    }

    pub async fn find(&self, id: impl Into<SqlValue>) -> Result<Option<Record>> {
        let id = id.into();
        let key = format!("{}.{}", E::TABLE_NAME, E::PRIMARY_KEY);
        self.query()
            .filter_with(|p| {
                p.where_eq(&key, id);
            })
            .first(&self.pool)
            .await
    }

    pub async fn find_by(&self, pairs: &[(&str, SqlValue)], columns: &[&str]) -> Result<Vec<Record>> {
        self.get_by_condition(pairs, columns)?.fetch_all(&self.pool).await
    }

    pub async fn find_one_by(&self, pairs: &[(&str, SqlValue)], columns: &[&str]) -> Result<Option<Record>> {
        self.get_by_condition(pairs, columns)?.first(&self.pool).await
    }

    pub async fn find_by_attr_first(&self, attr: &str, value: impl Into<SqlValue>) -> Result<Option<Record>> {
        self.find_one_by(&[(attr, value.into())], &[]).await
    }

    /// Every row whose `attr` is one of `values`.
    pub async fn find_by_attr_in_array(&self, attr: &str, values: Vec<SqlValue>) -> Result<Vec<Record>> {
        let attr = ensure_identifier(attr)?;
        self.query()
            .filter_with(|p| {
                p.where_in(attr, values);
            })
            .fetch_all(&self.pool)
            .await
    }

    /// Map of primary key to `attr`, in primary-key order.
    pub async fn pluck_attr_id(&self, attr: &str) -> Result<Map<String, JsonValue>> {
        let rows = self
            .query()
            .select([E::PRIMARY_KEY, attr])?
            .order_by(E::PRIMARY_KEY, OrderDirection::Asc)?
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row.value(E::PRIMARY_KEY).to_string();
                let value = row.get(attr).cloned().unwrap_or(JsonValue::Null);
                (key, value)
            })
            .collect())
    }

    /// True when some row has `column = value`.
    pub async fn exist(&self, column: &str, value: impl Into<SqlValue>) -> Result<bool> {
        self.get_by_condition(&[(column, value.into())], &[])?
            .exists(&self.pool)
            .await
    }

    /// Every row, sorted by `order` or the entity's default sort.
    pub async fn all(&self, columns: &[&str], order: Option<(&str, OrderDirection)>) -> Result<Vec<Record>> {
        let (column, direction) = default_order::<E>(order);
        self.query()
            .select(columns)?
            .order_by(&column, direction)?
            .fetch_all(&self.pool)
            .await
    }

    /// Every row with each named relation loaded in full.
    pub async fn get_all_with_relationship(
        &self,
        relations: &[&str],
        columns: &[&str],
        order: Option<(&str, OrderDirection)>,
    ) -> Result<Vec<Record>> {
        let (column, direction) = default_order::<E>(order);
        let mut query = self.query().select(columns)?.order_by(&column, direction)?;
        for relation in relations {
            query = query.with(relation, ["*"])?;
        }
        query.fetch_all(&self.pool).await
    }

    /// Rows matching `pairs`, sorted by one column.
    pub async fn order_by(
        &self,
        column: &str,
        direction: OrderDirection,
        pairs: &[(&str, SqlValue)],
    ) -> Result<Vec<Record>> {
        self.get_by_condition(pairs, &[])?
            .order_by(column, direction)?
            .fetch_all(&self.pool)
            .await
    }

    pub async fn find_by_with_relationship(
        &self,
        relations: &[&str],
        pairs: &[(&str, SqlValue)],
        columns: &[&str],
        order: Option<(&str, OrderDirection)>,
    ) -> Result<Vec<Record>> {
        let (column, direction) = default_order::<E>(order);
        let mut query = self.get_by_condition(pairs, columns)?.order_by(&column, direction)?;
        for relation in relations {
            query = query.with(relation, ["*"])?;
        }
        query.fetch_all(&self.pool).await
    }

    /// Unexecuted `column IN (values)` query with `relation` eager-loaded.
    pub fn where_in(&self, column: &str, values: Vec<SqlValue>, relation: &str) -> Result<EntityQuery<E>> {
        let column = ensure_identifier(column)?;
        self.query()
            .filter_with(|p| {
                p.where_in(column, values);
            })
            .with(relation, ["*"])
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert one row and return it as stored.
    pub async fn create(&self, input: Record) -> Result<Record> {
        Self::logged("Create", self.create_row(input).await)
    }

    async fn create_row(&self, input: Record) -> Result<Record> {
        let mut row = input;
        match E::KEY_KIND {
            KeyKind::Uuid if row.value(E::PRIMARY_KEY).is_null() => {
                row.insert(E::PRIMARY_KEY, JsonValue::String(uuid::Uuid::new_v4().to_string()));
            }
            KeyKind::AutoIncrement if row.contains(E::PRIMARY_KEY) && row.value(E::PRIMARY_KEY).is_null() => {
                row.remove(E::PRIMARY_KEY);
            }
            _ => {}
        }
        if E::TIMESTAMPS {
            let now = now_timestamp();
            for column in [COLUMN_CREATED_AT, COLUMN_UPDATED_AT] {
                if row.value(column).is_null() {
                    row.insert(column, JsonValue::String(now.clone()));
                }
            }
        }

        let columns = row
            .columns()
            .map(ensure_identifier)
            .collect::<Result<Vec<_>>>()?;
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", E::TABLE_NAME)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                E::TABLE_NAME,
                columns.join(", "),
                placeholders(columns.len())
            )
        };
        let values: Vec<SqlValue> = columns.iter().map(|c| row.value(c)).collect();
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Creating record");

        let stored = bind_all(sqlx::query(&sql), &values).fetch_one(&self.pool).await?;
        Ok(decode_row(&stored)?)
    }

    /// Bulk insert without key generation or timestamps. Every row must
    /// carry the same columns as the first.
    pub async fn insert(&self, rows: &[Record]) -> Result<u64> {
        Self::logged("Insert", self.insert_rows(rows, None).await)
    }

    async fn insert_rows(&self, rows: &[Record], conflict: Option<String>) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns = first
            .columns()
            .map(ensure_identifier)
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(RepositoryError::validation("cannot insert rows without columns"));
        }

        let mut values = Vec::with_capacity(rows.len() * columns.len());
        for row in rows {
            if row.columns().count() != columns.len() || columns.iter().any(|c| !row.contains(c)) {
                return Err(RepositoryError::validation(format!(
                    "every row inserted into {} must have the columns ({})",
                    E::TABLE_NAME,
                    columns.join(", ")
                )));
            }
            values.extend(columns.iter().map(|c| row.value(c)));
        }

        let tuple = format!("({})", placeholders(columns.len()));
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            E::TABLE_NAME,
            columns.join(", "),
            vec![tuple; rows.len()].join(", ")
        );
        if let Some(conflict) = conflict {
            sql.push(' ');
            sql.push_str(&conflict);
        }
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, rows = rows.len(), "Inserting records");

        let result = bind_all(sqlx::query(&sql), &values).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Write the attributes of `input` that differ from `record`.
    ///
    /// Nothing is written when no attribute changed. The read and the write
    /// are not guarded against concurrent writers.
    pub async fn update(&self, record: &Record, input: Record) -> Result<Record> {
        Self::logged("Update", self.update_row(record, input).await)
    }

    async fn update_row(&self, record: &Record, input: Record) -> Result<Record> {
        let key = record.value(E::PRIMARY_KEY);
        if key.is_null() {
            return Err(RepositoryError::validation(format!(
                "cannot update a {} record without its {}",
                E::TABLE_NAME,
                E::PRIMARY_KEY
            )));
        }

        let mut dirty: Vec<(&str, SqlValue)> = Vec::new();
        for column in input.columns() {
            let value = input.value(column);
            if !record.value(column).loosely_eq(&value) {
                dirty.push((ensure_identifier(column)?, value));
            }
        }
        if dirty.is_empty() {
            tracing::debug!(table = E::TABLE_NAME, key = %key, "Update skipped, record is clean");
            return Ok(record.clone());
        }

        let now = now_timestamp();
        if E::TIMESTAMPS && !dirty.iter().any(|(c, _)| *c == COLUMN_UPDATED_AT) {
            dirty.push((COLUMN_UPDATED_AT, SqlValue::String(now)));
        }

        let assignments: Vec<String> = dirty.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? RETURNING *",
            E::TABLE_NAME,
            assignments.join(", "),
            E::PRIMARY_KEY
        );
        let mut values: Vec<SqlValue> = dirty.into_iter().map(|(_, v)| v).collect();
        values.push(key.clone());
        tracing::debug!(table = E::TABLE_NAME, sql = %sql, "Updating record");

        let stored = bind_all(sqlx::query(&sql), &values)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found(E::TABLE_NAME, &key))?;
        Ok(decode_row(&stored)?)
    }

    /// Update the first row matching `attributes` with `values`, or create
    /// one from both maps.
    pub async fn update_or_create(&self, attributes: Record, values: Record) -> Result<Record> {
        Self::logged("updateOrCreate", self.update_or_create_row(attributes, values).await)
    }

    async fn update_or_create_row(&self, attributes: Record, values: Record) -> Result<Record> {
        let pairs: Vec<(&str, SqlValue)> = attributes.columns().map(|c| (c, attributes.value(c))).collect();
        let existing = self.get_by_condition(&pairs, &[])?.first(&self.pool).await?;
        match existing {
            Some(record) => self.update_row(&record, values).await,
            None => {
                let mut row = attributes.clone();
                for (column, value) in values.into_map() {
                    row.insert(column, value);
                }
                self.create_row(row).await
            }
        }
    }

    /// Insert `rows`; rows that collide on `unique_by` get the `update`
    /// columns overwritten instead. An empty `update` ignores collisions.
    pub async fn upsert(&self, rows: Vec<Record>, unique_by: &[&str], update: &[&str]) -> Result<u64> {
        Self::logged("Upsert", self.upsert_rows(rows, unique_by, update).await)
    }

    async fn upsert_rows(&self, mut rows: Vec<Record>, unique_by: &[&str], update: &[&str]) -> Result<u64> {
        if unique_by.is_empty() {
            return Err(RepositoryError::validation("upsert needs at least one unique column"));
        }
        let unique = unique_by
            .iter()
            .map(|c| ensure_identifier(c))
            .collect::<Result<Vec<_>>>()?;
        let mut update = update
            .iter()
            .map(|c| ensure_identifier(c))
            .collect::<Result<Vec<_>>>()?;

        if E::TIMESTAMPS {
            let now = now_timestamp();
            for row in &mut rows {
                for column in [COLUMN_CREATED_AT, COLUMN_UPDATED_AT] {
                    if !row.contains(column) {
                        row.insert(column, JsonValue::String(now.clone()));
                    }
                }
            }
            if !update.is_empty() && !update.contains(&COLUMN_UPDATED_AT) {
                update.push(COLUMN_UPDATED_AT);
            }
        }

        let conflict = if update.is_empty() {
            format!("ON CONFLICT({}) DO NOTHING", unique.join(", "))
        } else {
            let assignments: Vec<String> = update.iter().map(|c| format!("{0} = excluded.{0}", c)).collect();
            format!("ON CONFLICT({}) DO UPDATE SET {}", unique.join(", "), assignments.join(", "))
        };
        self.insert_rows(&rows, Some(conflict)).await
    }

    /// Delete rows by primary key. An empty list deletes nothing.
    pub async fn delete(&self, ids: &[SqlValue]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let key = format!("{}.{}", E::TABLE_NAME, E::PRIMARY_KEY);
        let result = self
            .query()
            .filter_with(|p| {
                p.where_in(&key, ids.to_vec());
            })
            .delete(&self.pool)
            .await;
        Self::logged("Delete", result)
    }

    /// Delete every row.
    pub async fn delete_all(&self) -> Result<u64> {
        Self::logged("Delete", self.query().delete(&self.pool).await)
    }

    pub async fn delete_by_attr(&self, attr: &str, value: impl Into<SqlValue>) -> Result<u64> {
        let query = self.get_by_condition(&[(attr, value.into())], &[])?;
        Self::logged("Delete", query.delete(&self.pool).await)
    }
}
