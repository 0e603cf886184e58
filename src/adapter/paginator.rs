//! Pagination strategies: turn a fetch request's limit/offset into query parameters

use crate::query::FetchRequest;

/// Builds pagination query parameters for a fetch
pub trait Paginator: Send + Sync {
    fn parameters(&self, request: &FetchRequest) -> Vec<(String, String)>;
}

/// `?limit=N&offset=M`
#[derive(Debug, Clone)]
pub struct LimitOffsetPaginator {
    pub limit_parameter: String,
    pub offset_parameter: String,
}

impl LimitOffsetPaginator {
    pub fn new(limit_parameter: impl Into<String>, offset_parameter: impl Into<String>) -> Self {
        Self {
            limit_parameter: limit_parameter.into(),
            offset_parameter: offset_parameter.into(),
        }
    }
}

impl Default for LimitOffsetPaginator {
    fn default() -> Self {
        Self::new("limit", "offset")
    }
}

impl Paginator for LimitOffsetPaginator {
    fn parameters(&self, request: &FetchRequest) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = request.limit {
            params.push((self.limit_parameter.clone(), limit.to_string()));
        }
        if let Some(offset) = request.offset {
            params.push((self.offset_parameter.clone(), offset.to_string()));
        }
        params
    }
}

/// `?page=P&per_page=N`, pages numbered from 1
///
/// Only emitted when the request has a limit; the offset is rounded down
/// to the page containing it.
#[derive(Debug, Clone)]
pub struct PagePerPagePaginator {
    pub page_parameter: String,
    pub per_page_parameter: String,
}

impl PagePerPagePaginator {
    pub fn new(page_parameter: impl Into<String>, per_page_parameter: impl Into<String>) -> Self {
        Self {
            page_parameter: page_parameter.into(),
            per_page_parameter: per_page_parameter.into(),
        }
    }
}

impl Default for PagePerPagePaginator {
    fn default() -> Self {
        Self::new("page", "per_page")
    }
}

impl Paginator for PagePerPagePaginator {
    fn parameters(&self, request: &FetchRequest) -> Vec<(String, String)> {
        let Some(per_page) = request.limit.filter(|l| *l > 0) else {
            return Vec::new();
        };
        let page = request.offset.unwrap_or(0) / per_page + 1;
        vec![
            (self.page_parameter.clone(), page.to_string()),
            (self.per_page_parameter.clone(), per_page.to_string()),
        ]
    }
}

type ParameterFn = dyn Fn(&FetchRequest) -> Vec<(String, String)> + Send + Sync;

/// Paginator backed by a closure
pub struct FnPaginator {
    build: Box<ParameterFn>,
}

impl FnPaginator {
    pub fn new(
        build: impl Fn(&FetchRequest) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
        }
    }
}

impl std::fmt::Debug for FnPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPaginator").finish_non_exhaustive()
    }
}

impl Paginator for FnPaginator {
    fn parameters(&self, request: &FetchRequest) -> Vec<(String, String)> {
        (self.build)(request)
    }
}
