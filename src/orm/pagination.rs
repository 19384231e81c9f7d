//! Offset pagination
//!
//! Pages are 1-based. The envelope carries the total row count of the filtered
//! query so callers can render page links.

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT_PAGE: i64 = 10;

/// Page size meaning "fetch everything".
pub const UNLIMITED_PAGE: i64 = 9999;

pub const PAGE_DEFAULT: i64 = 1;

/// Caller-side defaults applied by [`Pagination::from_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: i64,
    pub unlimited_page_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_LIMIT_PAGE,
            unlimited_page_size: UNLIMITED_PAGE,
        }
    }
}

/// Requested page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Strict constructor: both values must be at least 1 and the page's
    /// offset must fit in an `i64`. Sizes above [`UNLIMITED_PAGE`] are clamped.
    pub fn new(page: i64, page_size: i64) -> Result<Self> {
        if page < 1 || page_size < 1 {
            return Err(RepositoryError::validation(format!(
                "page and page_size must be >= 1 (got {} and {})",
                page, page_size
            )));
        }
        let page_size = page_size.min(UNLIMITED_PAGE);
        if (page - 1).checked_mul(page_size).is_none() {
            return Err(RepositoryError::validation(format!(
                "page {} is out of range for page_size {}",
                page, page_size
            )));
        }
        Ok(Self { page, page_size })
    }

    /// Apply request conventions: missing page is the first page, missing
    /// size is the default, oversized sizes are clamped to "unlimited".
    /// Pages past the last addressable offset are clamped to it.
    pub fn from_request(page: Option<i64>, page_size: Option<i64>, limits: PageLimits) -> Self {
        let page_size = match page_size {
            Some(size) if size >= 1 => size.min(limits.unlimited_page_size),
            _ => limits.default_page_size,
        }
        .max(1);
        let page = page
            .filter(|p| *p >= 1)
            .unwrap_or(PAGE_DEFAULT)
            .min(i64::MAX / page_size);
        Self { page, page_size }
    }

    /// First page holding every row.
    pub fn unlimited() -> Self {
        Self {
            page: PAGE_DEFAULT,
            page_size: UNLIMITED_PAGE,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

/// A page of rows plus the length of the whole result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub last_page: i64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        let size = pagination.page_size.max(1);
        let last_page = (total / size + i64::from(total % size != 0)).max(1);
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            last_page,
            has_next_page: pagination.page < last_page,
            has_previous_page: pagination.page > 1,
        }
    }

    /// Convert each item, keeping the page metadata.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            last_page: self.last_page,
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
        }
    }
}
