use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 200;

/// Raw query-string parameters. Values are kept as strings so malformed
/// numbers fall back to defaults instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
    pub search: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            search: String::new(),
        }
    }
}

impl ListQuery {
    pub fn from_params(params: &ListParams) -> Self {
        let limit = params
            .limit
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        let offset = params
            .offset
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let search = params
            .search
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        ListQuery {
            limit,
            offset,
            search,
        }
    }

    /// The SQL `LIKE` pattern for the search term, or an empty string when
    /// there is nothing to filter on.
    pub fn like_pattern(&self) -> String {
        if self.search.is_empty() {
            String::new()
        } else {
            format!("%{}%", self.search.to_lowercase())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PageEnvelope<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
    pub next_offset: i64,
    pub search: String,
}

impl<T> Page<T> {
    pub fn into_envelope(self, query: &ListQuery) -> PageEnvelope<T> {
        let count = self.items.len();
        let has_more = query.offset + count < self.total;
        PageEnvelope {
            items: self.items,
            count,
            total: self.total,
            limit: query.limit,
            offset: query.offset,
            has_more,
            next_offset: if has_more {
                (query.offset + count) as i64
            } else {
                -1
            },
            search: query.search.clone(),
        }
    }
}
