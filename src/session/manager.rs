use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::state::{
    merge_profile, Credentials, LogoutReason, Registration, SessionEvent, SessionState,
    UserProfile,
};
use super::store::SessionStore;
use crate::api::{CategoriesApi, ConversationsApi, ItemsApi};
use crate::auth::{AuthApi, TokenRefresher, REFRESH_PATH};
use crate::config::Settings;
use crate::error::{ClientError, ErrorInfo};
use crate::http::{self, FormData, RequestPipeline};
use crate::storage::{self, TokenStorage};

const LOGIN_FAILED: &str = "Login failed. Please try again.";
const REGISTRATION_FAILED: &str = "Registration failed. Please try again.";
const UPDATE_FAILED: &str = "Failed to update profile. Please try again.";

/// Owner of the authenticated session.
///
/// Wires the session store, the token refresher and the request pipeline
/// together and exposes the identity operations on top of them. Share it
/// behind an `Arc`; every method takes `&self`.
pub struct SessionManager {
    settings: Arc<Settings>,
    store: Arc<SessionStore>,
    refresher: Arc<TokenRefresher>,
    pipeline: Arc<RequestPipeline>,
    auth: AuthApi,
}

impl SessionManager {
    pub fn create(settings: Settings, storage: Arc<dyn TokenStorage>) -> Result<Self, ClientError> {
        let base_url = http::parse_base_url(&settings.api.base_url)?;
        let client = http::build_client(&settings.api)?;

        let store = Arc::new(SessionStore::new(storage));
        let refresher = Arc::new(TokenRefresher::new(
            client.clone(),
            http::endpoint_url(&base_url, REFRESH_PATH)?,
            store.clone(),
        ));
        let pipeline = Arc::new(RequestPipeline::new(
            client,
            base_url,
            store.clone(),
            refresher.clone(),
        ));

        info!(
            environment = %settings.environment,
            base_url = %settings.api.base_url,
            "Session manager created"
        );

        Ok(Self {
            settings: Arc::new(settings),
            store,
            refresher,
            auth: AuthApi::new(pipeline.clone()),
            pipeline,
        })
    }

    /// Build the manager with the storage backend named in `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self, ClientError> {
        let storage = storage::from_config(&settings.storage);
        Self::create(settings, storage)
    }

    /// Restore a persisted session and revalidate it against the backend.
    ///
    /// Ends with `is_loading == false` and either a confirmed user or an
    /// empty session. A failed profile fetch gets exactly one refresh
    /// attempt before the session is dropped.
    pub async fn initialize(&self) -> SessionState {
        let tokens = match self.store.load_persisted_tokens() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to read persisted tokens, starting anonymous: {}", e);
                None
            }
        };

        let Some(tokens) = tokens else {
            debug!("No persisted session");
            self.store.finish_loading(None);
            return self.state();
        };

        let cached_user = self.store.load_snapshot().and_then(|snapshot| snapshot.user);
        self.store.rehydrate(tokens, cached_user);
        info!("Revalidating persisted session");

        match self.auth.profile().await {
            Ok(user) => {
                self.store.set_user(user);
                info!("Persisted session restored");
                return self.state();
            }
            Err(e) => warn!("Profile fetch failed during rehydration: {}", e),
        }

        if let Err(e) = self.refresher.ensure_fresh_token(None).await {
            // The refresher already ended the session
            warn!("Could not refresh persisted session: {}", e);
            return self.state();
        }

        match self.auth.profile().await {
            Ok(user) => {
                self.store.set_user(user);
                info!("Persisted session restored after refresh");
            }
            Err(e) => {
                error!("Profile still unavailable after refresh: {}", e);
                self.store.clear(LogoutReason::RehydrationFailed);
            }
        }

        self.state()
    }

    /// Wait for any in-flight refresh to finish and release the manager.
    pub async fn dispose(self) {
        self.refresher.settle().await;
        info!("Session manager disposed");
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, ClientError> {
        self.store.begin_loading();
        debug!(username = %credentials.username, "Logging in");

        match self.authenticate(credentials).await {
            Ok(user) => {
                info!(username = %credentials.username, "Logged in");
                Ok(user)
            }
            Err(e) => {
                warn!(username = %credentials.username, "Login failed: {}", e);
                self.store
                    .reject_authentication(ErrorInfo::new(login_failure_message(&e), e.status()));
                Err(e)
            }
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserProfile, ClientError> {
        let response = self.auth.login(credentials).await?;
        let tokens = response.tokens();

        let user = match response.user {
            Some(user) if user.is_object() => user,
            _ => self.auth.profile_with(&tokens.access).await?,
        };

        self.store.establish(tokens, user.clone());
        Ok(user)
    }

    /// Create an account. Logs in as well when the backend issues tokens.
    pub async fn register(&self, fields: &serde_json::Value) -> Result<Registration, ClientError> {
        self.store.begin_loading();

        let result = self.enroll(fields).await;

        match result {
            Ok(Registration::LoginRequired) => {
                info!("Registered, login required");
                self.store.finish_loading(None);
                Ok(Registration::LoginRequired)
            }
            Ok(registration) => {
                info!("Registered and logged in");
                Ok(registration)
            }
            Err(e) => {
                warn!("Registration failed: {}", e);
                let message = e
                    .field_summary()
                    .unwrap_or_else(|| REGISTRATION_FAILED.to_string());
                self.store
                    .reject_authentication(ErrorInfo::new(message, e.status()));
                Err(e)
            }
        }
    }

    async fn enroll(&self, fields: &serde_json::Value) -> Result<Registration, ClientError> {
        let response = self.auth.register(fields).await?;
        let Some(tokens) = response.tokens() else {
            return Ok(Registration::LoginRequired);
        };

        let user = match response.user {
            Some(user) if user.is_object() => user,
            _ => self.auth.profile_with(&tokens.access).await?,
        };
        self.store.establish(tokens, user.clone());
        Ok(Registration::Authenticated(user))
    }

    pub fn logout(&self) {
        self.store.clear(LogoutReason::Requested);
    }

    /// Exchange the refresh token for a new pair now.
    pub async fn refresh_access_token(&self) -> Result<(), ClientError> {
        if self.store.refresh_token().is_none() {
            warn!("Refresh requested without a refresh token");
            self.store.clear(LogoutReason::RefreshFailed);
            return Err(ClientError::authentication("No refresh token available"));
        }

        self.refresher.ensure_fresh_token(None).await?;
        Ok(())
    }

    /// Send a partial profile update and merge the server's answer into `user`.
    pub async fn update_user(&self, patch: FormData) -> Result<UserProfile, ClientError> {
        self.store.begin_loading();

        match self.auth.update_profile(patch).await {
            Ok(canonical) => {
                let user = self.store.modify_user(|user| apply_patch(user, &canonical));
                self.store.finish_loading(None);
                info!("Profile updated");
                Ok(user.unwrap_or(canonical))
            }
            Err(e) => {
                warn!("Profile update failed: {}", e);
                let message = e.server_field("message").unwrap_or(UPDATE_FAILED).to_string();
                self.store
                    .finish_loading(Some(ErrorInfo::new(message, e.status())));
                Err(e)
            }
        }
    }

    /// Merge `patch` into the current user without contacting the backend.
    ///
    /// Returns `None` and changes nothing while logged out.
    pub fn set_user(&self, patch: &UserProfile) -> Option<UserProfile> {
        self.store.modify_user(|user| apply_patch(user, patch))
    }

    pub fn clear_error(&self) {
        self.store.clear_error();
    }

    pub fn state(&self) -> SessionState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn items(&self) -> ItemsApi {
        ItemsApi::new(self.pipeline.clone())
    }

    pub fn categories(&self) -> CategoriesApi {
        CategoriesApi::new(self.pipeline.clone())
    }

    pub fn conversations(&self) -> ConversationsApi {
        ConversationsApi::new(self.pipeline.clone())
    }
}

fn apply_patch(user: &mut Option<UserProfile>, patch: &UserProfile) {
    match user {
        Some(current) => merge_profile(current, patch),
        None => *user = Some(patch.clone()),
    }
}

fn login_failure_message(err: &ClientError) -> String {
    err.server_field("detail")
        .or_else(|| err.server_field("message"))
        .unwrap_or(LOGIN_FAILED)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_for(server: &MockServer) -> (Arc<MemoryStorage>, SessionManager) {
        let storage = Arc::new(MemoryStorage::new());
        let settings = Settings::with_base_url(&server.uri()).unwrap();
        let manager = SessionManager::create(settings, storage.clone()).unwrap();
        (storage, manager)
    }

    #[test]
    fn test_create_rejects_bad_base_url() {
        let settings = Settings::with_base_url("not a url").unwrap();
        let result = SessionManager::create(settings, Arc::new(MemoryStorage::new()));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_initialize_without_tokens_stays_anonymous() {
        let server = MockServer::start().await;
        let (_storage, manager) = manager_for(&server);

        let state = manager.initialize().await;
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert_eq!(state.user, None);
    }

    #[tokio::test]
    async fn test_login_with_embedded_user_skips_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": "A1",
                "refresh": "R1",
                "user": {"id": 7, "username": "bob"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/profile/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
            .expect(0)
            .mount(&server)
            .await;

        let (storage, manager) = manager_for(&server);
        let user = manager
            .login(&Credentials::new("bob", "hunter2"))
            .await
            .unwrap();

        assert_eq!(user, json!({"id": 7, "username": "bob"}));
        assert_eq!(storage.load(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A1"));
    }

    async fn failed_login(response: ResponseTemplate) -> Option<ErrorInfo> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/"))
            .respond_with(response)
            .expect(1)
            .mount(&server)
            .await;

        let (storage, manager) = manager_for(&server);
        manager
            .login(&Credentials::new("bob", "hunter2"))
            .await
            .unwrap_err();

        let state = manager.state();
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);
        assert!(storage.is_empty());
        state.last_error
    }

    #[tokio::test]
    async fn test_login_failure_message_falls_back() {
        let last_error = failed_login(ResponseTemplate::new(500)).await;
        assert_eq!(last_error, Some(ErrorInfo::new(LOGIN_FAILED, 500)));

        let last_error = failed_login(ResponseTemplate::new(401).set_body_json(json!({}))).await;
        assert_eq!(last_error, Some(ErrorInfo::new(LOGIN_FAILED, 401)));
    }

    #[tokio::test]
    async fn test_login_failure_uses_server_message() {
        let last_error =
            failed_login(ResponseTemplate::new(401).set_body_json(json!({"message": "Bad creds"})))
                .await;
        assert_eq!(last_error, Some(ErrorInfo::new("Bad creds", 401)));

        let last_error =
            failed_login(ResponseTemplate::new(500).set_body_json(json!({"detail": "db down"})))
                .await;
        assert_eq!(last_error, Some(ErrorInfo::new("db down", 500)));

        let last_error =
            failed_login(ResponseTemplate::new(429).set_body_json(json!({"detail": "slow down"})))
                .await;
        assert_eq!(last_error, Some(ErrorInfo::new("slow down", 429)));
    }

    #[tokio::test]
    async fn test_register_without_tokens_requires_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register/"))
            .and(body_json(json!({"username": "carol", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"message": "Account created"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (storage, manager) = manager_for(&server);
        let outcome = manager
            .register(&json!({"username": "carol", "password": "pw"}))
            .await
            .unwrap();

        assert_eq!(outcome, Registration::LoginRequired);
        assert!(!manager.state().is_authenticated);
        assert!(!manager.state().is_loading);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_register_with_tokens_logs_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register/"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"access": "A1", "refresh": "R1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/profile/"))
            .and(header("Authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let (_storage, manager) = manager_for(&server);
        let outcome = manager.register(&json!({"username": "dave"})).await.unwrap();

        assert_eq!(outcome, Registration::Authenticated(json!({"id": 3})));
        assert!(manager.state().is_authenticated);
    }

    #[tokio::test]
    async fn test_register_field_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/register/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "email": ["Enter a valid email address."],
                "username": ["A user with that username already exists."]
            })))
            .mount(&server)
            .await;

        let (_storage, manager) = manager_for(&server);
        let err = manager.register(&json!({"username": "eve"})).await.unwrap_err();

        assert!(matches!(err, ClientError::Validation { .. }));
        assert_eq!(
            manager.state().last_error.unwrap().message,
            "email: Enter a valid email address.\nusername: A user with that username already exists."
        );
    }

    #[tokio::test]
    async fn test_update_user_merges_response() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/auth/profile/"))
            .and(body_json(json!({"bio": "Hello"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"bio": "Hello", "updated": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (_storage, manager) = manager_for(&server);
        manager.store().establish(
            crate::session::TokenPair::new("A1", "R1"),
            json!({"id": 1, "name": "Alice"}),
        );

        let user = manager
            .update_user(FormData::new().field("bio", "Hello"))
            .await
            .unwrap();

        assert_eq!(user, json!({"id": 1, "name": "Alice", "bio": "Hello", "updated": true}));
        assert_eq!(manager.state().user, Some(user));
    }

    #[tokio::test]
    async fn test_update_user_failure_keeps_user() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/auth/profile/"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "Nope"})))
            .mount(&server)
            .await;

        let (_storage, manager) = manager_for(&server);
        manager
            .store()
            .establish(crate::session::TokenPair::new("A1", "R1"), json!({"id": 1}));

        let err = manager
            .update_user(FormData::new().field("bio", "x"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), 409);
        let state = manager.state();
        assert_eq!(state.user, Some(json!({"id": 1})));
        assert_eq!(state.last_error, Some(ErrorInfo::new("Nope", 409)));
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (storage, manager) = manager_for(&server);
        storage.save(ACCESS_TOKEN_KEY, "A1").unwrap();

        let err = manager.refresh_access_token().await.unwrap_err();
        assert!(err.is_authentication());
        assert!(storage.load(REFRESH_TOKEN_KEY).unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_set_user_without_network() {
        let storage = Arc::new(MemoryStorage::new());
        let settings = Settings::with_base_url("http://localhost:1").unwrap();
        let manager = SessionManager::create(settings, storage).unwrap();
        manager
            .store()
            .establish(crate::session::TokenPair::new("A1", "R1"), json!({"id": 1}));

        assert_eq!(
            manager.set_user(&json!({"avatar": "a.png"})),
            Some(json!({"id": 1, "avatar": "a.png"}))
        );
        assert_eq!(manager.state().user, Some(json!({"id": 1, "avatar": "a.png"})));
    }

    #[test]
    fn test_set_user_while_logged_out_is_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let settings = Settings::with_base_url("http://localhost:1").unwrap();
        let manager = SessionManager::create(settings, storage.clone()).unwrap();

        assert_eq!(manager.set_user(&json!({"id": 1})), None);

        let state = manager.state();
        assert!(!state.is_authenticated);
        assert_eq!(state.user, None);
        assert_eq!(state.tokens, None);
        assert!(storage.is_empty());
    }
}
