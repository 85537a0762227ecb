use serde_json::Value;
use std::sync::Arc;

use super::items::ITEMS_PATH;
use super::pagination::Page;
use crate::error::ClientError;
use crate::http::{ApiRequest, RequestPipeline};

pub const CATEGORIES_PATH: &str = "/api/categories/";

#[derive(Clone)]
pub struct CategoriesApi {
    pipeline: Arc<RequestPipeline>,
}

impl CategoriesApi {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    /// All categories. The backend answers with a bare list or a page.
    pub async fn list(&self) -> Result<Vec<Value>, ClientError> {
        let body = self.pipeline.send(ApiRequest::get(CATEGORIES_PATH)).await?.body;
        into_results(body)
    }

    pub async fn featured_items(&self) -> Result<Vec<Value>, ClientError> {
        let request = ApiRequest::get(ITEMS_PATH).query("featured", "true");
        let body = self.pipeline.send(request).await?.body;
        into_results(body)
    }
}

pub(crate) fn into_results(body: Value) -> Result<Vec<Value>, ClientError> {
    match body {
        Value::Array(results) => Ok(results),
        Value::Null => Ok(Vec::new()),
        other => Ok(serde_json::from_value::<Page<Value>>(other)?.results),
    }
}
