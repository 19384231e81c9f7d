//! Declarative repository layer over SQLite.
//!
//! Callers describe what they want as a condition map plus list options;
//! [`Repository`] turns that into parameterized SQL, runs it through a
//! `sqlx` pool and hands back [`Record`]s or a [`Paginated`] page.

pub mod config;
pub mod db;
pub mod error;
pub mod orm;
pub mod telemetry;

pub use config::RepositoryConfig;
pub use db::Database;
pub use error::{RepositoryError, Result};
pub use orm::{
    Condition, DatabaseEntity, EntityQuery, JoinDescriptor, JoinType, ListOptions, ListResult, OrderDirection,
    Paginated, Pagination, Predicate, Record, RelationDef, RelationDescriptor, Repository, SqlValue,
};
