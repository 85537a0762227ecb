use serde_json::Value;
use std::sync::Arc;

use super::categories::into_results;
use crate::error::ClientError;
use crate::http::{ApiRequest, RequestPipeline};

pub const CONVERSATIONS_PATH: &str = "/api/conversations/";

/// Buyer/seller message threads.
#[derive(Clone)]
pub struct ConversationsApi {
    pipeline: Arc<RequestPipeline>,
}

impl ConversationsApi {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn list(&self) -> Result<Vec<Value>, ClientError> {
        let body = self
            .pipeline
            .send(ApiRequest::get(CONVERSATIONS_PATH))
            .await?
            .body;
        into_results(body)
    }

    pub async fn get(&self, id: &str) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("{}{}/", CONVERSATIONS_PATH, id));
        Ok(self.pipeline.send(request).await?.body)
    }

    /// Start a conversation, e.g. `{"item": 12, "message": "Still available?"}`.
    pub async fn create(&self, body: Value) -> Result<Value, ClientError> {
        let request = ApiRequest::post(CONVERSATIONS_PATH).json(body);
        Ok(self.pipeline.send(request).await?.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::session::{SessionManager, TokenPair};
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_and_fetch_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/conversations/"))
            .and(header("Authorization", "Bearer A1"))
            .and(body_json(json!({"item": 12, "message": "Still available?"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 3})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/conversations/3/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 3, "messages": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let settings = Settings::with_base_url(&server.uri()).unwrap();
        let manager = SessionManager::create(settings, Arc::new(MemoryStorage::new())).unwrap();
        manager
            .store()
            .establish(TokenPair::new("A1", "R1"), json!({"id": 1}));

        let conversations = manager.conversations();
        let created = conversations
            .create(json!({"item": 12, "message": "Still available?"}))
            .await
            .unwrap();
        assert_eq!(created["id"], 3);

        let thread = conversations.get("3").await.unwrap();
        assert_eq!(thread["messages"], json!([]));
    }
}
