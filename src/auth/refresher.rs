use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, Url};
use serde_json::json;
use tracing::{debug, info, warn};

use super::endpoints::RefreshResponse;
use crate::error::RefreshError;
use crate::session::{LogoutReason, SessionStore, TokenPair};

type RefreshOutcome = Shared<BoxFuture<'static, Result<TokenPair, RefreshError>>>;

/// The single live refresh, shared by everyone who needs a new token while it runs.
struct RefreshOperation {
    id: u64,
    started_at: DateTime<Utc>,
    outcome: RefreshOutcome,
}

enum Entry {
    Ready(Result<TokenPair, RefreshError>),
    Wait(RefreshOutcome),
}

/// Single-flight access token refresher.
///
/// Creating or joining the in-flight operation happens under one mutex, so
/// any number of concurrent callers produce at most one call to the refresh
/// endpoint. The operation is spawned on the runtime and always runs to
/// completion; it leaves the slot before its outcome reaches the waiters.
pub struct TokenRefresher {
    client: Client,
    refresh_url: Url,
    session: Arc<SessionStore>,
    slot: Mutex<Option<RefreshOperation>>,
    next_id: AtomicU64,
}

impl TokenRefresher {
    pub fn new(client: Client, refresh_url: Url, session: Arc<SessionStore>) -> Self {
        Self {
            client,
            refresh_url,
            session,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Obtain a token pair newer than `stale_access`.
    ///
    /// Joins the in-flight refresh if there is one. Otherwise, when the
    /// session already holds a different access token than `stale_access`,
    /// that token is returned without a network call. Pass `None` to force
    /// a refresh.
    pub async fn ensure_fresh_token(
        self: &Arc<Self>,
        stale_access: Option<&str>,
    ) -> Result<TokenPair, RefreshError> {
        match self.join_or_start(stale_access) {
            Entry::Ready(result) => result,
            Entry::Wait(outcome) => outcome.await,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// When the in-flight operation started, if there is one.
    pub fn in_flight_since(&self) -> Option<DateTime<Utc>> {
        self.lock_slot().as_ref().map(|op| op.started_at)
    }

    /// Wait for the in-flight refresh, if any, to settle.
    pub async fn settle(&self) {
        let pending = self.lock_slot().as_ref().map(|op| op.outcome.clone());
        if let Some(outcome) = pending {
            let _ = outcome.await;
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshOperation>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start(self: &Arc<Self>, stale_access: Option<&str>) -> Entry {
        let mut slot = self.lock_slot();

        if let Some(op) = slot.as_ref() {
            debug!(operation = op.id, "Joining in-flight token refresh");
            return Entry::Wait(op.outcome.clone());
        }

        let current = self.session.tokens();

        if let (Some(stale), Some(current)) = (stale_access, current.as_ref()) {
            if current.access != stale {
                debug!("Access token already replaced, skipping refresh");
                return Entry::Ready(Ok(current.clone()));
            }
        }

        let Some(current) = current else {
            drop(slot);
            warn!("No refresh token available, ending session");
            self.session.force_logout(LogoutReason::RefreshFailed);
            return Entry::Ready(Err(RefreshError::MissingRefreshToken));
        };

        let op = self.start(current.refresh);
        let outcome = op.outcome.clone();
        *slot = Some(op);
        Entry::Wait(outcome)
    }

    fn start(self: &Arc<Self>, refresh_token: String) -> RefreshOperation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.session.set_refreshing(true);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(id, refresh_token).await });

        let outcome = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        RefreshOperation {
            id,
            started_at: Utc::now(),
            outcome,
        }
    }

    async fn run(
        self: Arc<Self>,
        id: u64,
        refresh_token: String,
    ) -> Result<TokenPair, RefreshError> {
        info!(operation = id, "Refreshing access token");

        let result = match self.request_new_pair(&refresh_token).await {
            Ok(pair) => {
                if self.session.replace_tokens(&refresh_token, pair.clone()) {
                    info!(operation = id, "Access token refreshed");
                    Ok(pair)
                } else {
                    warn!(operation = id, "Session changed during refresh, discarding tokens");
                    Err(RefreshError::Aborted(
                        "session ended while refreshing".to_string(),
                    ))
                }
            }
            Err(e) => {
                warn!(operation = id, "Token refresh failed: {}", e);
                self.session.force_logout(LogoutReason::RefreshFailed);
                Err(e)
            }
        };

        self.finish(id);
        result
    }

    fn finish(&self, id: u64) {
        let mut slot = self.lock_slot();
        if slot.as_ref().map_or(false, |op| op.id == id) {
            *slot = None;
            self.session.set_refreshing(false);
        }
    }

    async fn request_new_pair(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let response = self
            .client
            .post(self.refresh_url.clone())
            .json(&json!({ "refresh": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected(status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        // Servers that do not rotate refresh tokens only send a new access token
        Ok(TokenPair {
            access: body.access,
            refresh: body.refresh.unwrap_or_else(|| refresh_token.to_string()),
        })
    }
}
