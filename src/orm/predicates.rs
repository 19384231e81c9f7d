//! WHERE clause accumulation
//!
//! [`Predicates`] is an ordered list of SQL fragments joined left to right by
//! their AND/OR connector, the same flat shape a fluent query builder emits.
//! Values are collected alongside the fragments and bound positionally.
//!
//! Column names are spliced verbatim. Callers holding untrusted names must run
//! them through [`ensure_identifier`](crate::db::sqlite_helpers::ensure_identifier)
//! first; the condition compiler does.

use super::escape::{LIKE_ESCAPE_SQL, contains_pattern};
use super::traits::{RelationDef, SqlValue};
use crate::db::sqlite_helpers::placeholders;
use crate::error::{RepositoryError, Result};

/// Connector placed before a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    fn to_sql(self) -> &'static str {
        match self {
            Boolean::And => " AND ",
            Boolean::Or => " OR ",
        }
    }
}

/// Binary comparison accepted by the fallback operator branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

impl Comparison {
    /// Parse a raw operator string. Only the allow-listed operators pass.
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            "like" => Ok(Self::Like),
            "not like" => Ok(Self::NotLike),
            other => Err(RepositoryError::validation(format!(
                "unsupported operator '{}'",
                other
            ))),
        }
    }

    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }
}

#[derive(Debug, Clone)]
struct WhereClause {
    boolean: Boolean,
    sql: String,
    values: Vec<SqlValue>,
}

/// Ordered AND/OR predicate list with bound values.
#[derive(Debug, Clone, Default)]
pub struct Predicates {
    clauses: Vec<WhereClause>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    fn push(&mut self, boolean: Boolean, sql: String, values: Vec<SqlValue>) -> &mut Self {
        self.clauses.push(WhereClause {
            boolean,
            sql,
            values,
        });
        self
    }

    /// Render the predicate list, or `None` when it is empty.
    pub fn to_sql(&self) -> Option<String> {
        if self.clauses.is_empty() {
            return None;
        }
        let mut sql = String::new();
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                sql.push_str(clause.boolean.to_sql());
            }
            sql.push_str(&clause.sql);
        }
        Some(sql)
    }

    /// Values in placeholder order.
    pub fn bindings(&self) -> Vec<SqlValue> {
        self.clauses
            .iter()
            .flat_map(|c| c.values.iter().cloned())
            .collect()
    }

    // ========================================================================
    // Raw and comparison clauses
    // ========================================================================

    pub fn where_raw(&mut self, sql: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
        self.push(Boolean::And, sql.into(), values)
    }

    pub fn or_where_raw(&mut self, sql: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
        self.push(Boolean::Or, sql.into(), values)
    }

    pub fn compare(
        &mut self,
        boolean: Boolean,
        column: &str,
        op: Comparison,
        value: impl Into<SqlValue>,
    ) -> &mut Self {
        let value = value.into();
        let sql = match (op, value.is_null()) {
            // `= NULL` never matches; the store-level intent is a null test.
            (Comparison::Eq, true) => format!("{} IS NULL", column),
            (Comparison::Ne, true) => format!("{} IS NOT NULL", column),
            _ => format!("{} {} ?", column, op.to_sql()),
        };
        let values = if sql.ends_with('?') { vec![value] } else { Vec::new() };
        self.push(boolean, sql, values)
    }

    pub fn where_compare(&mut self, column: &str, op: Comparison, value: impl Into<SqlValue>) -> &mut Self {
        self.compare(Boolean::And, column, op, value)
    }

    pub fn or_where_compare(&mut self, column: &str, op: Comparison, value: impl Into<SqlValue>) -> &mut Self {
        self.compare(Boolean::Or, column, op, value)
    }

    pub fn where_eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.compare(Boolean::And, column, Comparison::Eq, value)
    }

    pub fn or_where_eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.compare(Boolean::Or, column, Comparison::Eq, value)
    }

    // ========================================================================
    // IN / NOT IN
    // ========================================================================

    pub fn in_list(
        &mut self,
        boolean: Boolean,
        column: &str,
        values: Vec<SqlValue>,
        negated: bool,
    ) -> &mut Self {
        if values.is_empty() {
            // Empty IN admits nothing, empty NOT IN admits everything.
            let sql = if negated { "1 = 1" } else { "0 = 1" };
            return self.push(boolean, sql.to_string(), Vec::new());
        }
        let keyword = if negated { "NOT IN" } else { "IN" };
        let sql = format!("{} {} ({})", column, keyword, placeholders(values.len()));
        self.push(boolean, sql, values)
    }

    pub fn where_in(&mut self, column: &str, values: Vec<SqlValue>) -> &mut Self {
        self.in_list(Boolean::And, column, values, false)
    }

    pub fn or_where_in(&mut self, column: &str, values: Vec<SqlValue>) -> &mut Self {
        self.in_list(Boolean::Or, column, values, false)
    }

    pub fn where_not_in(&mut self, column: &str, values: Vec<SqlValue>) -> &mut Self {
        self.in_list(Boolean::And, column, values, true)
    }

    pub fn or_where_not_in(&mut self, column: &str, values: Vec<SqlValue>) -> &mut Self {
        self.in_list(Boolean::Or, column, values, true)
    }

    // ========================================================================
    // BETWEEN
    // ========================================================================

    pub fn between(
        &mut self,
        boolean: Boolean,
        column: &str,
        low: SqlValue,
        high: SqlValue,
        negated: bool,
    ) -> &mut Self {
        let keyword = if negated { "NOT BETWEEN" } else { "BETWEEN" };
        let sql = format!("{} {} ? AND ?", column, keyword);
        self.push(boolean, sql, vec![low, high])
    }

    pub fn where_between(&mut self, column: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> &mut Self {
        self.between(Boolean::And, column, low.into(), high.into(), false)
    }

    pub fn or_where_between(&mut self, column: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> &mut Self {
        self.between(Boolean::Or, column, low.into(), high.into(), false)
    }

    pub fn where_not_between(&mut self, column: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> &mut Self {
        self.between(Boolean::And, column, low.into(), high.into(), true)
    }

    pub fn or_where_not_between(&mut self, column: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> &mut Self {
        self.between(Boolean::Or, column, low.into(), high.into(), true)
    }

    // ========================================================================
    // NULL tests
    // ========================================================================

    pub fn null(&mut self, boolean: Boolean, column: &str, negated: bool) -> &mut Self {
        let keyword = if negated { "IS NOT NULL" } else { "IS NULL" };
        self.push(boolean, format!("{} {}", column, keyword), Vec::new())
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.null(Boolean::And, column, false)
    }

    pub fn or_where_null(&mut self, column: &str) -> &mut Self {
        self.null(Boolean::Or, column, false)
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.null(Boolean::And, column, true)
    }

    pub fn or_where_not_null(&mut self, column: &str) -> &mut Self {
        self.null(Boolean::Or, column, true)
    }

    // ========================================================================
    // Dates and patterns
    // ========================================================================

    /// `DATE(column) <op> ?`
    pub fn where_date(&mut self, column: &str, op: Comparison, value: impl Into<SqlValue>) -> &mut Self {
        let sql = format!("DATE({}) {} ?", column, op.to_sql());
        self.push(Boolean::And, sql, vec![value.into()])
    }

    /// `column LIKE '%text%'` with `text` escaped.
    pub fn like(&mut self, boolean: Boolean, column: &str, text: &str) -> &mut Self {
        let sql = format!("{} LIKE ? {}", column, LIKE_ESCAPE_SQL);
        self.push(boolean, sql, vec![SqlValue::String(contains_pattern(text))])
    }

    pub fn where_like(&mut self, column: &str, text: &str) -> &mut Self {
        self.like(Boolean::And, column, text)
    }

    pub fn or_where_like(&mut self, column: &str, text: &str) -> &mut Self {
        self.like(Boolean::Or, column, text)
    }

    // ========================================================================
    // Nesting
    // ========================================================================

    /// Parenthesized sub-list. An empty group adds nothing.
    pub fn group<F>(&mut self, boolean: Boolean, build: F) -> &mut Self
    where
        F: FnOnce(&mut Predicates),
    {
        let mut inner = Predicates::new();
        build(&mut inner);
        match inner.to_sql() {
            Some(sql) => {
                let values = inner.bindings();
                self.push(boolean, format!("({})", sql), values)
            }
            None => self,
        }
    }

    pub fn where_group<F: FnOnce(&mut Predicates)>(&mut self, build: F) -> &mut Self {
        self.group(Boolean::And, build)
    }

    pub fn or_where_group<F: FnOnce(&mut Predicates)>(&mut self, build: F) -> &mut Self {
        self.group(Boolean::Or, build)
    }

    /// Existence test against a related table, correlated to `parent_table`.
    pub fn where_has<F>(&mut self, parent_table: &str, relation: &RelationDef, build: F) -> &mut Self
    where
        F: FnOnce(&mut Predicates),
    {
        let mut inner = Predicates::new();
        build(&mut inner);
        let mut sql = format!(
            "EXISTS (SELECT 1 FROM {table} WHERE {table}.{related} = {parent}.{parent_key}",
            table = relation.table,
            related = relation.related_key,
            parent = parent_table,
            parent_key = relation.parent_key,
        );
        if let Some(inner_sql) = inner.to_sql() {
            sql.push_str(" AND (");
            sql.push_str(&inner_sql);
            sql.push(')');
        }
        sql.push(')');
        let values = inner.bindings();
        self.push(Boolean::And, sql, values)
    }
}
