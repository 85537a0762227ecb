//! Session module for the Birii client
//!
//! This module holds the authenticated session: its state, the store that
//! mirrors it into storage, and the manager exposing login, registration,
//! logout and profile operations.

mod manager;
mod state;
mod store;

pub use manager::SessionManager;
pub use state::{
    merge_profile, Credentials, LogoutReason, PersistedSnapshot, Registration, SessionEvent,
    SessionPhase, SessionState, TokenPair, UserProfile,
};
pub use store::SessionStore;
