use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ErrorInfo;

/// Opaque identity payload owned by the backend.
pub type UserProfile = Value;

/// Username/password pair submitted for login. Never stored.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Access and refresh token, always replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Conceptual session state derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticated,
    /// Authenticated with a refresh in flight. Not logged out.
    Refreshing,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub tokens: Option<TokenPair>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub last_error: Option<ErrorInfo>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match (self.is_authenticated, self.is_refreshing) {
            (false, _) => SessionPhase::Anonymous,
            (true, false) => SessionPhase::Authenticated,
            (true, true) => SessionPhase::Refreshing,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.refresh.as_str())
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

/// The part of the session mirrored into storage besides the raw tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The caller asked for it.
    Requested,
    /// The refresh token was rejected or the refresh call failed.
    RefreshFailed,
    /// A request still failed authorization after being retried.
    RetryRejected,
    /// Persisted tokens could not be revalidated on startup.
    RehydrationFailed,
}

/// Notifications published by the session on its broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    TokensRefreshed,
    LoggedOut { reason: LogoutReason },
    /// The session was forcibly ended; the user must authenticate again.
    AuthenticationRequired,
}

/// Successful outcome of a registration.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The backend issued tokens and the session is now authenticated.
    Authenticated(UserProfile),
    /// The account exists but the user still has to log in.
    LoginRequired,
}

/// Overlay the keys of `patch` onto `target`. Non-object values replace.
pub fn merge_profile(target: &mut UserProfile, patch: &UserProfile) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}
