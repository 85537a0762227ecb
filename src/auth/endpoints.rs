use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ClientError;
use crate::http::{ApiRequest, FormData, RequestPipeline};
use crate::session::{Credentials, TokenPair, UserProfile};

pub const LOGIN_PATH: &str = "/api/auth/login/";
pub const REGISTER_PATH: &str = "/api/auth/register/";
pub const PROFILE_PATH: &str = "/api/auth/profile/";
pub const REFRESH_PATH: &str = "/api/auth/token/refresh/";

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl LoginResponse {
    pub fn tokens(&self) -> TokenPair {
        TokenPair::new(self.access.clone(), self.refresh.clone())
    }
}

/// Registration may or may not log the new account in.
#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl RegisterResponse {
    pub fn tokens(&self) -> Option<TokenPair> {
        match (&self.access, &self.refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access.clone(), refresh.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Calls to the `/api/auth/` endpoints.
#[derive(Clone)]
pub struct AuthApi {
    pipeline: Arc<RequestPipeline>,
}

impl AuthApi {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ClientError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(serde_json::to_value(credentials)?)
            .anonymous();
        self.pipeline.send_json(request).await
    }

    pub async fn register(&self, fields: &Value) -> Result<RegisterResponse, ClientError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .json(fields.clone())
            .anonymous();
        let response = self.pipeline.send(request).await?;

        // A bare confirmation (or no body) still counts as a successful registration
        Ok(serde_json::from_value(response.body).unwrap_or(RegisterResponse {
            access: None,
            refresh: None,
            user: None,
        }))
    }

    /// Profile for the session's current token, without the refresh protocol.
    pub async fn profile(&self) -> Result<UserProfile, ClientError> {
        let response = self
            .pipeline
            .send(ApiRequest::get(PROFILE_PATH).without_refresh())
            .await?;
        Ok(response.body)
    }

    /// Profile for a token that is not installed in the session yet.
    pub async fn profile_with(&self, access: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .pipeline
            .send(ApiRequest::get(PROFILE_PATH).bearer(access))
            .await?;
        Ok(response.body)
    }

    pub async fn update_profile(&self, patch: FormData) -> Result<UserProfile, ClientError> {
        let request = ApiRequest::patch(PROFILE_PATH).body(patch.into_body());
        let response = self.pipeline.send(request).await?;
        Ok(response.body)
    }
}
