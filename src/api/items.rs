use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::pagination::{Page, Paginator};
use crate::error::ClientError;
use crate::http::{ApiRequest, FormData, RequestPipeline};

pub const ITEMS_PATH: &str = "/api/items/";

pub(crate) fn item_path(id: &str) -> String {
    format!("{}{}/", ITEMS_PATH, id)
}

/// Marketplace listings.
#[derive(Clone)]
pub struct ItemsApi {
    pipeline: Arc<RequestPipeline>,
}

impl ItemsApi {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    /// One page of listings matching `filters` (e.g. `search`, `category`).
    pub async fn list(&self, filters: &[(&str, &str)]) -> Result<Page<Value>, ClientError> {
        let request = ApiRequest::get(ITEMS_PATH).queries(filters.iter().copied());
        self.pipeline.send_json(request).await
    }

    pub fn paginate(&self) -> Paginator<Value> {
        Paginator::new(self.pipeline.clone(), ITEMS_PATH)
    }

    pub async fn get(&self, id: &str) -> Result<Value, ClientError> {
        Ok(self.pipeline.send(ApiRequest::get(item_path(id))).await?.body)
    }

    /// Create a listing. Always sent as multipart so images can ride along.
    pub async fn create(&self, draft: FormData) -> Result<Value, ClientError> {
        let request = ApiRequest::post(ITEMS_PATH).body(draft.into_multipart());
        let item = self.pipeline.send(request).await?.body;
        let id = item.get("id").cloned().unwrap_or_default();
        info!(id = %id, "Item created");
        Ok(item)
    }

    pub async fn update(&self, id: &str, draft: FormData) -> Result<Value, ClientError> {
        let request = ApiRequest::patch(item_path(id)).body(draft.into_multipart());
        Ok(self.pipeline.send(request).await?.body)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        self.pipeline.send(ApiRequest::delete(item_path(id))).await?;
        info!(id, "Item deleted");
        Ok(())
    }

    pub async fn toggle_favorite(&self, id: &str) -> Result<Value, ClientError> {
        let request = ApiRequest::post(format!("{}toggle-favorite/", item_path(id)));
        Ok(self.pipeline.send(request).await?.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::http::FileUpload;
    use crate::session::SessionManager;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use wiremock::matchers::{header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn items_for(server: &MockServer) -> ItemsApi {
        let settings = Settings::with_base_url(&server.uri()).unwrap();
        SessionManager::create(settings, Arc::new(MemoryStorage::new()))
            .unwrap()
            .items()
    }

    #[test]
    fn test_item_paths() {
        assert_eq!(item_path("42"), "/api/items/42/");
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items/"))
            .and(query_param("search", "bike"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": null,
                "previous": null,
                "results": [{"id": 9, "title": "Bike"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = items_for(&server).list(&[("search", "bike")]).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0]["title"], "Bike");
    }

    #[test_log::test(tokio::test)]
    async fn test_create_is_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items/"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 10})))
            .expect(1)
            .mount(&server)
            .await;

        let draft = FormData::new()
            .field("title", "Bike")
            .field("price", 120)
            .file("image1", FileUpload::new("bike.jpg", vec![0xff, 0xd8]).with_mime("image/jpeg"));

        let item = items_for(&server).create(draft).await.unwrap();
        assert_eq!(item, json!({"id": 10}));
    }

    #[test_log::test(tokio::test)]
    async fn test_create_without_id_in_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"title": "Bike"})))
            .expect(1)
            .mount(&server)
            .await;

        let item = items_for(&server)
            .create(FormData::new().field("title", "Bike"))
            .await
            .unwrap();
        assert_eq!(item, json!({"title": "Bike"}));
    }

    #[tokio::test]
    async fn test_missing_item_and_empty_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items/404/"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Not found."})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/items/5/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/items/5/toggle-favorite/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_favorited": true})))
            .expect(1)
            .mount(&server)
            .await;

        let items = items_for(&server);
        let err = items.get("404").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound { .. }));

        items.delete("5").await.unwrap();
        assert_eq!(
            items.toggle_favorite("5").await.unwrap(),
            json!({"is_favorited": true})
        );
    }
}
