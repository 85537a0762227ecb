//! Authentication module for the Birii client
//!
//! This module holds the `/api/auth/` endpoint calls and the single-flight
//! token refresher shared by every request.

mod endpoints;
mod refresher;

pub use endpoints::{
    AuthApi, LoginResponse, RefreshResponse, RegisterResponse, LOGIN_PATH, PROFILE_PATH,
    REFRESH_PATH, REGISTER_PATH,
};
pub use refresher::TokenRefresher;
