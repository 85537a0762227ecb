use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ClientError, ErrorInfo};
use crate::http::{ApiRequest, RequestPipeline};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// One page of a paginated list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Accumulates the pages of a list endpoint.
///
/// Nothing is fetched until [`Paginator::refresh`] or
/// [`Paginator::load_more`] is called. Extra filters are sent with every
/// page request.
pub struct Paginator<T> {
    pipeline: Arc<RequestPipeline>,
    path: String,
    filters: Vec<(String, String)>,
    page_size: u32,
    page: u32,
    items: Vec<T>,
    has_more: bool,
    total_count: u64,
    last_error: Option<ErrorInfo>,
}

impl<T: DeserializeOwned> Paginator<T> {
    pub fn new(pipeline: Arc<RequestPipeline>, path: impl Into<String>) -> Self {
        Self {
            pipeline,
            path: path.into(),
            filters: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 0,
            items: Vec::new(),
            has_more: true,
            total_count: 0,
            last_error: None,
        }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// Drop everything loaded so far and fetch the first page again.
    pub async fn refresh(&mut self) -> Result<&[T], ClientError> {
        self.fetch(1).await
    }

    /// Append the next page. A no-op once the last page has been loaded.
    pub async fn load_more(&mut self) -> Result<&[T], ClientError> {
        if !self.has_more {
            return Ok(&self.items);
        }
        self.fetch(self.page + 1).await
    }

    async fn fetch(&mut self, page: u32) -> Result<&[T], ClientError> {
        let request = ApiRequest::get(self.path.clone())
            .queries(self.filters.iter().cloned())
            .query("page", page.to_string())
            .query("page_size", self.page_size.to_string());

        debug!(path = %self.path, page, "Fetching page");
        let result: Result<Page<T>, ClientError> = self.pipeline.send_json(request).await;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                self.last_error = Some(ErrorInfo::from(&e));
                return Err(e);
            }
        };

        if page == 1 {
            self.items = fetched.results;
        } else {
            self.items.extend(fetched.results);
        }
        self.total_count = fetched.count;
        self.has_more = fetched.next.is_some();
        self.page = page;
        self.last_error = None;

        Ok(&self.items)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Last page loaded, `0` before the first fetch.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }
}
