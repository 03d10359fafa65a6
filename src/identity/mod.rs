//! Identity records and the store contract around them.
//!
//! An identity owns exactly one refresh-token slot. The slot is written on
//! login, replaced on every refresh exchange and cleared on logout; there is
//! no other deletion path.

pub mod store;

pub use store::SqliteIdentityStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stored user record. Carries the password verifier and the current
/// refresh token, so it is never serialized outward; use [`Identity::public`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            fullname: self.fullname.clone(),
            avatar: self.avatar.clone(),
            cover_image: self.cover_image.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Outward projection of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new identity. `password` is plaintext; the store hashes it.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub password: String,
    pub avatar: String,
    pub cover_image: String,
}

/// Channel view of an identity, aggregated over the subscription edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub avatar: String,
    pub cover_image: String,
    pub subscribers_count: u64,
    pub channels_subscribed_to_count: u64,
    /// Whether the viewing identity subscribes to this channel.
    pub is_subscribed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("Identity not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Usernames and emails are unique case-insensitively; store them lowercased.
pub fn normalize_handle(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Persistence for identities, their refresh-token slot and subscriptions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Match on either field; absent fields never match.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<Identity>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Identity>>;

    /// Fails with [`StoreError::Conflict`] if the username or email is taken.
    async fn create(&self, new: NewIdentity) -> StoreResult<Identity>;

    /// Overwrite (or clear, with `None`) the identity's refresh-token slot.
    async fn update_refresh_token(&self, id: &str, token: Option<&str>) -> StoreResult<()>;

    /// Replace the slot only if it still holds `expected`. Returns whether
    /// the swap happened; the loser of a concurrent rotation gets `false`.
    async fn swap_refresh_token(&self, id: &str, expected: &str, new: &str) -> StoreResult<bool>;

    async fn verify_password(&self, identity: &Identity, plaintext: &str) -> bool;

    async fn update_password(&self, id: &str, plaintext: &str) -> StoreResult<()>;

    /// Fails with [`StoreError::Conflict`] if `email` belongs to someone else.
    async fn update_account(&self, id: &str, fullname: &str, email: &str) -> StoreResult<Identity>;

    async fn update_avatar(&self, id: &str, url: &str) -> StoreResult<Identity>;

    async fn update_cover_image(&self, id: &str, url: &str) -> StoreResult<Identity>;

    /// Subscribe if not subscribed, otherwise unsubscribe. Returns the new
    /// state. [`StoreError::NotFound`] if either identity does not exist.
    async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> StoreResult<bool>;

    async fn channel_profile(
        &self,
        username: &str,
        viewer_id: Option<&str>,
    ) -> StoreResult<Option<ChannelProfile>>;
}
