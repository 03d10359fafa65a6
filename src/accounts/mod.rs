//! Account use cases: registration, the login/refresh/logout token
//! lifecycle, profile edits and channel subscriptions.
//!
//! Handlers decode requests into the plain structs below and hand them to
//! [`AccountService`]; everything it returns is either domain data or an
//! [`ApiError`](crate::error::ApiError).

pub mod service;

pub use service::AccountService;

use axum::body::Bytes;
use serde::Deserialize;

use crate::auth::TokenPair;
use crate::identity::Identity;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub email: String,
}

/// A file taken out of a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

/// Result of a successful login: the identity and the pair already
/// persisted for it.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub tokens: TokenPair,
}
