//! Shared fixtures: a throwaway in-memory schema and the entities over it.

#![allow(dead_code)]

use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use repokit::orm::{Comparison, FilterInput, KeyKind};
use repokit::{Database, DatabaseEntity, EntityQuery, Record, RelationDef, Repository, Result};

const SCHEMA: &str = r#"
CREATE TABLE teams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    code TEXT,
    status INTEGER NOT NULL DEFAULT 1,
    team_id INTEGER REFERENCES teams(id),
    entry_at TEXT,
    leave_at TEXT,
    created_at TEXT,
    updated_at TEXT
);

CREATE TABLE orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL,
    total REAL NOT NULL,
    placed_at TEXT
);

CREATE TABLE tags (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    hits INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE customer_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL
);

CREATE TRIGGER customers_audit AFTER UPDATE ON customers
BEGIN
    INSERT INTO customer_audit (customer_id) VALUES (NEW.id);
END;
"#;

static CUSTOMER_RELATIONS: &[RelationDef] = &[
    RelationDef::has_many("orders", "orders", "customer_id", "id"),
    RelationDef::belongs_to("team", "teams", "team_id", "id"),
];

static ORDER_RELATIONS: &[RelationDef] = &[RelationDef::belongs_to("customer", "customers", "customer_id", "id")];

pub struct Customer;

impl DatabaseEntity for Customer {
    const TABLE_NAME: &'static str = "customers";
    const TIMESTAMPS: bool = true;

    fn relations() -> &'static [RelationDef] {
        CUSTOMER_RELATIONS
    }

    /// `{"min_status": n}` keeps customers whose status is at least `n`.
    fn apply_filter(query: EntityQuery<Self>, filter: &FilterInput) -> Result<EntityQuery<Self>> {
        match filter.get("min_status").and_then(JsonValue::as_i64) {
            Some(min) => Ok(query.filter_with(|p| {
                p.where_compare("customers.status", Comparison::Gte, min);
            })),
            None => Ok(query),
        }
    }
}

pub struct Order;

impl DatabaseEntity for Order {
    const TABLE_NAME: &'static str = "orders";

    fn relations() -> &'static [RelationDef] {
        ORDER_RELATIONS
    }
}

pub struct Team;

impl DatabaseEntity for Team {
    const TABLE_NAME: &'static str = "teams";
}

pub struct Tag;

impl DatabaseEntity for Tag {
    const TABLE_NAME: &'static str = "tags";
    const KEY_KIND: KeyKind = KeyKind::Uuid;
    const DEFAULT_SORT: &'static str = "slug";
}

/// One-connection in-memory database with the schema applied.
pub async fn setup() -> Database {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("apply schema");
    Database::new(pool)
}

/// Customers `c01..=cNN`; status cycles 2, 3, 1, 2, ...
pub async fn seed_customers(repo: &Repository<Customer>, count: usize) {
    for i in 1..=count {
        repo.create(
            Record::new()
                .with("name", format!("c{:02}", i))
                .with("status", (i % 3) as i64 + 1),
        )
        .await
        .expect("seed customer");
    }
}

pub async fn audit_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM customer_audit")
        .fetch_one(pool)
        .await
        .expect("count audit rows")
}

pub fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get_str("name").unwrap_or_default().to_string())
        .collect()
}
