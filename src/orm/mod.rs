//! Repository ORM Layer
//!
//! Compiles declarative condition maps and list options into parameterized
//! SQLite statements:
//! - Condition maps (`column -> {operator, value}`) become WHERE predicates
//! - List options add sorting, joins, eager loading and record filters
//! - Pagination always runs last and returns a page envelope
//!
//! # Repository Pattern
//!
//! ```rust,ignore
//! let repo = db.repository::<CustomerEntity>();
//!
//! let condition = Condition::from_json(&json!({
//!     "status": { "operator": "where_in", "value": [1, 2] },
//!     "name": { "operator": "where_like", "value": "50%" },
//! }))?;
//! let options = ListOptions::from_json(&json!({
//!     "paginate": { "page": 2, "page_size": 10 },
//!     "sort": { "name": "asc" },
//! }))?;
//! let page = repo.get_list(&["*"], &condition, &options).await?;
//! ```

pub mod builder;
pub mod condition;
pub mod escape;
pub mod options;
pub mod pagination;
pub mod predicates;
pub mod record;
pub mod relations;
pub mod repository;
pub mod traits;

pub use builder::EntityQuery;
pub use condition::{Condition, ConditionEntry, Predicate, apply_condition, parse_date_range};
pub use escape::escape_like;
pub use options::{
    JoinDescriptor, JoinType, ListOptions, QueryOption, RelationDescriptor, SortKey, move_item_to_last,
};
pub use pagination::{PageLimits, Paginated, Pagination};
pub use predicates::{Boolean, Comparison, Predicates};
pub use record::Record;
pub use repository::{ListResult, Repository};
pub use traits::{DatabaseEntity, FilterInput, KeyKind, OrderDirection, RelationDef, RelationKind, SqlValue};
