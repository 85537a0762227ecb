use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::state::{
    LogoutReason, PersistedSnapshot, SessionEvent, SessionState, TokenPair, UserProfile,
};
use crate::error::{ErrorInfo, StorageError};
use crate::storage::{TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SNAPSHOT_KEY};

const EVENT_CAPACITY: usize = 32;

/// Holder of the single [`SessionState`].
///
/// Every mutation goes through a short write-lock section that also mirrors
/// the affected part into storage, so the in-memory pair and the persisted
/// pair change in the same order. The lock is never held across `.await`.
pub struct SessionStore {
    state: RwLock<SessionState>,
    storage: Arc<dyn TokenStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(SessionState::default()),
            storage,
            events,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.read(|state| state.clone())
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.read(|state| state.tokens.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(|state| state.access_token().map(str::to_string))
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(|state| state.refresh_token().map(str::to_string))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Both persisted tokens, or `None` unless both are present.
    pub fn load_persisted_tokens(&self) -> Result<Option<TokenPair>, StorageError> {
        let access = self.storage.load(ACCESS_TOKEN_KEY)?;
        let refresh = self.storage.load(REFRESH_TOKEN_KEY)?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair { access, refresh }),
            _ => None,
        })
    }

    pub fn load_snapshot(&self) -> Option<PersistedSnapshot> {
        let raw = match self.storage.load(SNAPSHOT_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read session snapshot: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Ignoring malformed session snapshot: {}", e);
                None
            }
        }
    }

    /// Seed the state from persisted tokens while the profile is revalidated.
    pub(crate) fn rehydrate(&self, tokens: TokenPair, user: Option<UserProfile>) {
        self.update(|state| {
            state.tokens = Some(tokens);
            state.user = user;
            state.is_authenticated = true;
            state.is_loading = true;
        });
    }

    /// Install a freshly authenticated session in one step.
    pub(crate) fn establish(&self, tokens: TokenPair, user: UserProfile) {
        self.update(|state| {
            *state = SessionState {
                user: Some(user),
                tokens: Some(tokens),
                is_authenticated: true,
                ..SessionState::default()
            };
            self.mirror_tokens(state);
            self.mirror_snapshot(state);
        });
        info!("Session established");
        self.emit(SessionEvent::LoggedIn);
    }

    /// Swap the token pair if the session is still the one that started the
    /// refresh. Returns `false` when the session ended or changed meanwhile.
    pub(crate) fn replace_tokens(&self, used_refresh: &str, tokens: TokenPair) -> bool {
        let replaced = self.update(|state| {
            if state.refresh_token() != Some(used_refresh) {
                return false;
            }
            state.tokens = Some(tokens);
            self.mirror_tokens(state);
            true
        });

        if replaced {
            self.emit(SessionEvent::TokensRefreshed);
        }
        replaced
    }

    pub(crate) fn set_refreshing(&self, refreshing: bool) {
        self.update(|state| state.is_refreshing = refreshing && state.is_authenticated);
    }

    /// Finish loading with the canonical user profile.
    pub(crate) fn set_user(&self, user: UserProfile) {
        self.update(|state| {
            state.user = Some(user);
            state.is_loading = false;
            state.last_error = None;
            self.mirror_snapshot(state);
        });
    }

    /// Apply a local change to the current user and mirror it.
    ///
    /// Does nothing and returns `None` while logged out.
    pub(crate) fn modify_user(
        &self,
        f: impl FnOnce(&mut Option<UserProfile>),
    ) -> Option<UserProfile> {
        self.update(|state| {
            if !state.is_authenticated {
                return None;
            }
            f(&mut state.user);
            self.mirror_snapshot(state);
            state.user.clone()
        })
    }

    pub(crate) fn begin_loading(&self) {
        self.update(|state| {
            state.is_loading = true;
            state.last_error = None;
        });
    }

    pub(crate) fn finish_loading(&self, error: Option<ErrorInfo>) {
        self.update(|state| {
            state.is_loading = false;
            state.last_error = error;
        });
    }

    pub fn clear_error(&self) {
        self.update(|state| state.last_error = None);
    }

    /// Failed login or registration: nothing authenticated survives.
    pub(crate) fn reject_authentication(&self, error: ErrorInfo) {
        let had_session = self.update(|state| {
            let had_session = state.tokens.is_some();
            *state = SessionState {
                last_error: Some(error),
                ..SessionState::default()
            };
            if had_session {
                self.wipe_storage();
            }
            had_session
        });

        if had_session {
            self.emit(SessionEvent::LoggedOut {
                reason: LogoutReason::Requested,
            });
        }
    }

    /// Reset to the empty state and remove everything persisted. Idempotent.
    pub fn clear(&self, reason: LogoutReason) {
        let was_authenticated = self.update(|state| {
            let was_authenticated = state.is_authenticated;
            *state = SessionState::default();
            self.wipe_storage();
            was_authenticated
        });

        if was_authenticated {
            info!("Session cleared ({:?})", reason);
        } else {
            debug!("Session already empty ({:?})", reason);
        }
        self.emit(SessionEvent::LoggedOut { reason });
    }

    /// Clear the session and tell subscribers the user must log in again.
    pub(crate) fn force_logout(&self, reason: LogoutReason) {
        self.clear(reason);
        self.emit(SessionEvent::AuthenticationRequired);
    }

    fn wipe_storage(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SNAPSHOT_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Failed to remove {} from storage: {}", key, e);
            }
        }
    }

    fn mirror_tokens(&self, state: &SessionState) {
        let Some(tokens) = &state.tokens else {
            return;
        };

        let result = self
            .storage
            .save(ACCESS_TOKEN_KEY, &tokens.access)
            .and_then(|_| self.storage.save(REFRESH_TOKEN_KEY, &tokens.refresh));

        if let Err(e) = result {
            warn!("Failed to persist tokens, continuing in memory only: {}", e);
        }
    }

    fn mirror_snapshot(&self, state: &SessionState) {
        let result = serde_json::to_string(&state.snapshot())
            .map_err(StorageError::from)
            .and_then(|raw| self.storage.save(SNAPSHOT_KEY, &raw));

        if let Err(e) = result {
            warn!("Failed to persist session snapshot: {}", e);
        }
    }
}
