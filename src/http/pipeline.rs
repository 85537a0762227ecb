use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::endpoint_url;
use super::request::{ApiRequest, ApiResponse, AuthMode};
use crate::auth::TokenRefresher;
use crate::error::ClientError;
use crate::session::{LogoutReason, SessionStore};

/// Every outbound API call goes through here.
///
/// Attaches the session's access token and, on a 401, waits for the shared
/// refresh and re-sends the same request exactly once. A second 401 ends the
/// session. Other failures are returned as they are.
pub struct RequestPipeline {
    client: Client,
    base_url: Url,
    session: Arc<SessionStore>,
    refresher: Arc<TokenRefresher>,
}

impl RequestPipeline {
    pub fn new(
        client: Client,
        base_url: Url,
        session: Arc<SessionStore>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            client,
            base_url,
            session,
            refresher,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send `request` and return the successful response or a normalized error.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let span = tracing::info_span!(
            "api.request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            path = request.path(),
        );
        self.send_with_retry(request).instrument(span).await
    }

    /// Send `request` and deserialize the response body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ClientError> {
        self.send(request).await?.into_json()
    }

    async fn send_with_retry(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let token = match request.auth_mode() {
            AuthMode::Session | AuthMode::SessionNoRefresh => self.session.access_token(),
            AuthMode::Explicit => request.explicit_token().map(str::to_string),
            AuthMode::Anonymous => None,
        };

        let response = self.dispatch(&request, token.as_deref()).await?;
        if response.status != StatusCode::UNAUTHORIZED
            || request.auth_mode() != AuthMode::Session
            || token.is_none()
        {
            // Nothing to refresh without a session token
            return response.error_for_status();
        }

        if request.is_retried() {
            return Err(self.reject_after_retry());
        }

        request.mark_retried();
        debug!("Unauthorized, waiting for a fresh access token");

        let tokens = match self.refresher.ensure_fresh_token(token.as_deref()).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Could not refresh access token: {}", e);
                return Err(e.into());
            }
        };

        let retry = self.dispatch(&request, Some(&tokens.access)).await?;
        if retry.status == StatusCode::UNAUTHORIZED {
            return Err(self.reject_after_retry());
        }
        retry.error_for_status()
    }

    fn reject_after_retry(&self) -> ClientError {
        warn!("Request still unauthorized after token refresh, ending session");
        self.session.force_logout(LogoutReason::RetryRejected);
        ClientError::authentication("Authentication required")
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let url = endpoint_url(&self.base_url, request.path())?;
        let attempt = if request.is_retried() { 2 } else { 1 };
        debug!(attempt, authorized = token.is_some(), "Sending {} {}", request.method(), url);

        let response = request.build(&self.client, url, token)?.send().await.map_err(|e| {
            warn!(attempt, "Request failed without a response: {}", e);
            ClientError::from(e)
        })?;

        let response = ApiResponse::read(response).await?;
        debug!(attempt, status = response.status.as_u16(), "Received response");
        Ok(response)
    }
}
