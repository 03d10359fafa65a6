use std::sync::Arc;

use super::{
    ChangePasswordRequest, LoginOutcome, LoginRequest, RegisterRequest, UpdateAccountRequest,
    Upload,
};
use crate::auth::password::MIN_PASSWORD_LEN;
use crate::auth::{SessionTokenManager, TokenError, TokenPair};
use crate::error::{ApiError, ApiResult};
use crate::identity::{ChannelProfile, Identity, IdentityStore, NewIdentity, PublicIdentity, StoreError};
use crate::media::{MediaKind, ObjectStore};

const ALL_FIELDS_REQUIRED: &str = "All fields are required";

/// Account use cases over an identity store, a token manager and an
/// object store. Cheap to clone; shared by every request.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    tokens: Arc<SessionTokenManager>,
    media: Arc<dyn ObjectStore>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        tokens: Arc<SessionTokenManager>,
        media: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            store,
            tokens,
            media,
        }
    }

    pub fn tokens(&self) -> &SessionTokenManager {
        &self.tokens
    }

    // ── Registration and credentials ────────────────────────────────

    pub async fn register(&self, req: RegisterRequest) -> ApiResult<PublicIdentity> {
        let username = req.username.trim();
        let email = req.email.trim();
        if username.is_empty() || email.is_empty() || req.password.trim().is_empty() {
            return Err(ApiError::validation(ALL_FIELDS_REQUIRED));
        }
        validate_email(email)?;
        validate_password(&req.password)?;

        let fullname = req
            .fullname
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(username)
            .to_owned();

        let identity = self
            .store
            .create(NewIdentity {
                username: username.to_owned(),
                email: email.to_owned(),
                fullname,
                password: req.password,
                avatar: String::new(),
                cover_image: String::new(),
            })
            .await?;

        tracing::info!(user_id = %identity.id, username = %identity.username, "User registered");
        Ok(identity.public())
    }

    pub async fn login(&self, req: LoginRequest) -> ApiResult<LoginOutcome> {
        let username = non_blank(req.username.as_deref());
        let email = non_blank(req.email.as_deref());
        if username.is_none() && email.is_none() {
            return Err(ApiError::validation("username or email is required"));
        }
        if req.password.is_empty() {
            return Err(ApiError::validation("password is required"));
        }

        let identity = self
            .store
            .find_by_username_or_email(username, email)
            .await?
            .ok_or_else(|| ApiError::not_found("User does not exist"))?;

        if !self.store.verify_password(&identity, &req.password).await {
            tracing::warn!(user_id = %identity.id, "Login rejected: bad credentials");
            return Err(ApiError::unauthorized("Invalid user credentials"));
        }

        let tokens = self.tokens.issue(&identity.id)?;
        self.store
            .update_refresh_token(&identity.id, Some(&tokens.refresh_token))
            .await
            .map_err(|e| persist_failure(e, "store refresh token at login"))?;

        tracing::info!(user_id = %identity.id, "User logged in");
        Ok(LoginOutcome { identity, tokens })
    }

    pub async fn logout(&self, identity_id: &str) -> ApiResult<()> {
        self.store.update_refresh_token(identity_id, None).await?;
        tracing::info!(user_id = %identity_id, "User logged out");
        Ok(())
    }

    /// Exchange the current refresh token for a new pair. The presented
    /// token is dead afterwards whether or not the caller keeps the result.
    pub async fn refresh(&self, incoming: Option<&str>) -> ApiResult<TokenPair> {
        let presented = non_blank(incoming)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

        let claims = self.tokens.refresh_claims(presented)?;
        let identity = self
            .store
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

        if let Err(e) = self
            .tokens
            .verify_refresh(presented, identity.refresh_token.as_deref())
        {
            tracing::warn!(user_id = %identity.id, "Refresh rejected: {e}");
            return Err(e.into());
        }

        let pair = self.tokens.issue(&identity.id)?;
        let swapped = self
            .store
            .swap_refresh_token(&identity.id, presented, &pair.refresh_token)
            .await
            .map_err(|e| persist_failure(e, "store rotated refresh token"))?;
        if !swapped {
            tracing::warn!(user_id = %identity.id, "Refresh lost a concurrent rotation");
            return Err(TokenError::RefreshTokenMismatch.into());
        }

        tracing::debug!(user_id = %identity.id, "Refresh token rotated");
        Ok(pair)
    }

    /// Resolve an access token to the identity it was issued to.
    pub async fn authenticate(&self, access_token: Option<&str>) -> ApiResult<Identity> {
        let token = non_blank(access_token)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;
        let identity_id = self.tokens.verify_access(token)?;
        self.store
            .find_by_id(&identity_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid access token"))
    }

    pub async fn change_password(
        &self,
        identity: &Identity,
        req: ChangePasswordRequest,
    ) -> ApiResult<()> {
        if req.old_password.is_empty() || req.new_password.is_empty() {
            return Err(ApiError::validation(ALL_FIELDS_REQUIRED));
        }
        validate_password(&req.new_password)?;

        if !self.store.verify_password(identity, &req.old_password).await {
            tracing::warn!(user_id = %identity.id, "Password change rejected: old password mismatch");
            return Err(ApiError::validation("Invalid old password"));
        }

        self.store
            .update_password(&identity.id, &req.new_password)
            .await?;
        tracing::info!(user_id = %identity.id, "Password changed");
        Ok(())
    }

    // ── Profile ─────────────────────────────────────────────────────

    pub async fn update_account(
        &self,
        identity_id: &str,
        req: UpdateAccountRequest,
    ) -> ApiResult<PublicIdentity> {
        let fullname = req.fullname.trim();
        let email = req.email.trim();
        if fullname.is_empty() || email.is_empty() {
            return Err(ApiError::validation(ALL_FIELDS_REQUIRED));
        }
        validate_email(email)?;

        let identity = self
            .store
            .update_account(identity_id, fullname, email)
            .await?;
        Ok(identity.public())
    }

    pub async fn update_avatar(
        &self,
        identity_id: &str,
        upload: Option<Upload>,
    ) -> ApiResult<PublicIdentity> {
        let url = self.store_upload(MediaKind::Avatar, upload).await?;
        let identity = self.store.update_avatar(identity_id, &url).await?;
        Ok(identity.public())
    }

    pub async fn update_cover_image(
        &self,
        identity_id: &str,
        upload: Option<Upload>,
    ) -> ApiResult<PublicIdentity> {
        let url = self.store_upload(MediaKind::CoverImage, upload).await?;
        let identity = self.store.update_cover_image(identity_id, &url).await?;
        Ok(identity.public())
    }

    async fn store_upload(&self, kind: MediaKind, upload: Option<Upload>) -> ApiResult<String> {
        let upload = upload.ok_or_else(|| {
            ApiError::validation(format!("{} file is missing", kind.as_str()))
        })?;
        let stored = self
            .media
            .put(kind, upload.file_name.as_deref(), upload.bytes)
            .await?;
        Ok(stored.url)
    }

    // ── Channels ────────────────────────────────────────────────────

    pub async fn channel_profile(
        &self,
        username: &str,
        viewer_id: Option<&str>,
    ) -> ApiResult<ChannelProfile> {
        if username.trim().is_empty() {
            return Err(ApiError::validation("username is missing"));
        }
        self.store
            .channel_profile(username, viewer_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Channel does not exist"))
    }

    /// Returns whether `subscriber_id` is subscribed after the toggle.
    pub async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> ApiResult<bool> {
        if channel_id.trim().is_empty() {
            return Err(ApiError::validation("channel id is missing"));
        }
        if subscriber_id == channel_id {
            return Err(ApiError::validation("Cannot subscribe to your own channel"));
        }
        match self.store.toggle_subscription(subscriber_id, channel_id).await {
            Ok(subscribed) => Ok(subscribed),
            Err(StoreError::NotFound) => Err(ApiError::not_found("Channel does not exist")),
            Err(e) => Err(e.into()),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_email(email: &str) -> ApiResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::validation("email is invalid")),
    }
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// A token that was issued but could not be stored must fail the request.
fn persist_failure(err: StoreError, what: &'static str) -> ApiError {
    ApiError::Internal(anyhow::Error::new(err).context(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenSettings;
    use crate::identity::{SqliteIdentityStore, StoreResult};
    use crate::media::LocalObjectStore;
    use async_trait::async_trait;
    use axum::body::Bytes;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        service: AccountService,
        _media_dir: TempDir,
    }

    fn harness() -> Harness {
        harness_over(Arc::new(SqliteIdentityStore::in_memory().unwrap()))
    }

    fn harness_over(store: Arc<dyn IdentityStore>) -> Harness {
        let media_dir = TempDir::new().unwrap();
        let tokens = SessionTokenManager::new(TokenSettings::new(
            b"access-secret-for-tests".to_vec(),
            b"refresh-secret-for-tests".to_vec(),
            Duration::from_secs(900),
            Duration::from_secs(864_000),
        ));
        let service = AccountService::new(
            store,
            Arc::new(tokens),
            Arc::new(LocalObjectStore::new(
                media_dir.path(),
                "http://localhost/media",
                1024,
            )),
        );
        Harness {
            service,
            _media_dir: media_dir,
        }
    }

    /// How [`SwapOverride`] answers `swap_refresh_token`.
    #[derive(Clone, Copy)]
    enum Swap {
        WriteFails,
        LostRace,
    }

    /// SQLite store whose refresh-token swap is forced to one outcome.
    struct SwapOverride {
        inner: SqliteIdentityStore,
        swap: Swap,
    }

    impl SwapOverride {
        fn new(swap: Swap) -> Self {
            Self {
                inner: SqliteIdentityStore::in_memory().unwrap(),
                swap,
            }
        }
    }

    #[async_trait]
    impl IdentityStore for SwapOverride {
        async fn find_by_username_or_email(
            &self,
            username: Option<&str>,
            email: Option<&str>,
        ) -> StoreResult<Option<Identity>> {
            self.inner.find_by_username_or_email(username, email).await
        }

        async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_username(&self, username: &str) -> StoreResult<Option<Identity>> {
            self.inner.find_by_username(username).await
        }

        async fn create(&self, new: NewIdentity) -> StoreResult<Identity> {
            self.inner.create(new).await
        }

        async fn update_refresh_token(&self, id: &str, token: Option<&str>) -> StoreResult<()> {
            self.inner.update_refresh_token(id, token).await
        }

        async fn swap_refresh_token(&self, _id: &str, _expected: &str, _new: &str) -> StoreResult<bool> {
            match self.swap {
                Swap::WriteFails => Err(StoreError::Io(std::io::Error::other("disk full"))),
                Swap::LostRace => Ok(false),
            }
        }

        async fn verify_password(&self, identity: &Identity, plaintext: &str) -> bool {
            self.inner.verify_password(identity, plaintext).await
        }

        async fn update_password(&self, id: &str, plaintext: &str) -> StoreResult<()> {
            self.inner.update_password(id, plaintext).await
        }

        async fn update_account(&self, id: &str, fullname: &str, email: &str) -> StoreResult<Identity> {
            self.inner.update_account(id, fullname, email).await
        }

        async fn update_avatar(&self, id: &str, url: &str) -> StoreResult<Identity> {
            self.inner.update_avatar(id, url).await
        }

        async fn update_cover_image(&self, id: &str, url: &str) -> StoreResult<Identity> {
            self.inner.update_cover_image(id, url).await
        }

        async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> StoreResult<bool> {
            self.inner.toggle_subscription(subscriber_id, channel_id).await
        }

        async fn channel_profile(
            &self,
            username: &str,
            viewer_id: Option<&str>,
        ) -> StoreResult<Option<ChannelProfile>> {
            self.inner.channel_profile(username, viewer_id).await
        }
    }

    fn ada() -> RegisterRequest {
        RegisterRequest {
            username: "ada".into(),
            email: "ada@x.com".into(),
            fullname: None,
            password: "p@ss1234".into(),
        }
    }

    fn ada_login() -> LoginRequest {
        LoginRequest {
            username: Some("ada".into()),
            email: None,
            password: "p@ss1234".into(),
        }
    }

    #[tokio::test]
    async fn register_defaults_fullname_to_username() {
        let h = harness();
        let user = h.service.register(ada()).await.unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!(user.fullname, "ada");
    }

    #[tokio::test]
    async fn register_validates_fields() {
        let h = harness();

        let missing = h
            .service
            .register(RegisterRequest {
                email: "  ".into(),
                ..ada()
            })
            .await;
        assert!(matches!(missing, Err(ApiError::Validation(m)) if m == ALL_FIELDS_REQUIRED));

        let bad_email = h
            .service
            .register(RegisterRequest {
                email: "ada.example.com".into(),
                ..ada()
            })
            .await;
        assert!(matches!(bad_email, Err(ApiError::Validation(_))));

        let short = h
            .service
            .register(RegisterRequest {
                password: "short".into(),
                ..ada()
            })
            .await;
        assert!(matches!(short, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn register_twice_conflicts() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let again = h.service.register(ada()).await;
        assert!(matches!(again, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn login_issues_and_persists_pair() {
        let h = harness();
        h.service.register(ada()).await.unwrap();

        let outcome = h.service.login(ada_login()).await.unwrap();
        assert_eq!(
            h.service
                .tokens()
                .verify_access(&outcome.tokens.access_token)
                .unwrap(),
            outcome.identity.id
        );

        let me = h
            .service
            .authenticate(Some(&outcome.tokens.access_token))
            .await
            .unwrap();
        assert_eq!(me.refresh_token.as_deref(), Some(outcome.tokens.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn login_by_email_works() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let outcome = h
            .service
            .login(LoginRequest {
                username: None,
                email: Some("ADA@x.com".into()),
                password: "p@ss1234".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.identity.username, "ada");
    }

    #[tokio::test]
    async fn login_failures() {
        let h = harness();
        h.service.register(ada()).await.unwrap();

        let wrong = h
            .service
            .login(LoginRequest {
                password: "wrong-password".into(),
                ..ada_login()
            })
            .await;
        assert!(matches!(wrong, Err(ApiError::Unauthorized(m)) if m == "Invalid user credentials"));

        let unknown = h
            .service
            .login(LoginRequest {
                username: Some("grace".into()),
                ..ada_login()
            })
            .await;
        assert!(matches!(unknown, Err(ApiError::NotFound(_))));

        let no_handle = h
            .service
            .login(LoginRequest {
                username: None,
                email: Some(" ".into()),
                password: "p@ss1234".into(),
            })
            .await;
        assert!(matches!(no_handle, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let first = h.service.login(ada_login()).await.unwrap().tokens;

        let second = h.service.refresh(Some(&first.refresh_token)).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let replay = h.service.refresh(Some(&first.refresh_token)).await;
        assert!(
            matches!(replay, Err(ApiError::Unauthorized(m)) if m == "Refresh token is expired or used")
        );

        // The rotated-in token is still good.
        h.service.refresh(Some(&second.refresh_token)).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_after_logout_fails() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let outcome = h.service.login(ada_login()).await.unwrap();

        h.service.logout(&outcome.identity.id).await.unwrap();
        let result = h.service.refresh(Some(&outcome.tokens.refresh_token)).await;
        assert!(
            matches!(result, Err(ApiError::Unauthorized(m)) if m == "Refresh token is expired or used")
        );
    }

    #[tokio::test]
    async fn refresh_fails_when_rotated_token_cannot_be_stored() {
        let h = harness_over(Arc::new(SwapOverride::new(Swap::WriteFails)));
        h.service.register(ada()).await.unwrap();
        let outcome = h.service.login(ada_login()).await.unwrap();

        let result = h.service.refresh(Some(&outcome.tokens.refresh_token)).await;
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        // The slot still holds the token from login.
        let me = h
            .service
            .authenticate(Some(&outcome.tokens.access_token))
            .await
            .unwrap();
        assert_eq!(
            me.refresh_token.as_deref(),
            Some(outcome.tokens.refresh_token.as_str())
        );
    }

    #[tokio::test]
    async fn refresh_losing_concurrent_rotation_is_rejected() {
        let h = harness_over(Arc::new(SwapOverride::new(Swap::LostRace)));
        h.service.register(ada()).await.unwrap();
        let outcome = h.service.login(ada_login()).await.unwrap();

        let result = h.service.refresh(Some(&outcome.tokens.refresh_token)).await;
        assert!(
            matches!(result, Err(ApiError::Unauthorized(m)) if m == "Refresh token is expired or used")
        );
    }

    #[tokio::test]
    async fn refresh_rejects_missing_and_access_tokens() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let tokens = h.service.login(ada_login()).await.unwrap().tokens;

        let missing = h.service.refresh(None).await;
        assert!(matches!(missing, Err(ApiError::Unauthorized(m)) if m == "Unauthorized request"));

        let wrong_kind = h.service.refresh(Some(&tokens.access_token)).await;
        assert!(matches!(wrong_kind, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn authenticate_rejects_refresh_token() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let tokens = h.service.login(ada_login()).await.unwrap().tokens;

        let result = h.service.authenticate(Some(&tokens.refresh_token)).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
        assert!(matches!(
            h.service.authenticate(None).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn change_password_checks_old_password() {
        let h = harness();
        h.service.register(ada()).await.unwrap();
        let identity = h.service.login(ada_login()).await.unwrap().identity;

        let wrong_old = h
            .service
            .change_password(
                &identity,
                ChangePasswordRequest {
                    old_password: "not-my-password".into(),
                    new_password: "n3w-password".into(),
                },
            )
            .await;
        assert!(matches!(wrong_old, Err(ApiError::Validation(m)) if m == "Invalid old password"));

        h.service
            .change_password(
                &identity,
                ChangePasswordRequest {
                    old_password: "p@ss1234".into(),
                    new_password: "n3w-password".into(),
                },
            )
            .await
            .unwrap();

        let relogin = h
            .service
            .login(LoginRequest {
                password: "n3w-password".into(),
                ..ada_login()
            })
            .await;
        assert!(relogin.is_ok());
    }

    #[tokio::test]
    async fn update_account_requires_both_fields() {
        let h = harness();
        let user = h.service.register(ada()).await.unwrap();

        let missing = h
            .service
            .update_account(
                &user.id,
                UpdateAccountRequest {
                    fullname: String::new(),
                    email: "ada@x.com".into(),
                },
            )
            .await;
        assert!(matches!(missing, Err(ApiError::Validation(_))));

        let updated = h
            .service
            .update_account(
                &user.id,
                UpdateAccountRequest {
                    fullname: "Ada Lovelace".into(),
                    email: "ada@lovelace.org".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.fullname, "Ada Lovelace");
        assert_eq!(updated.email, "ada@lovelace.org");
    }

    #[tokio::test]
    async fn avatar_upload_sets_url() {
        let h = harness();
        let user = h.service.register(ada()).await.unwrap();

        let updated = h
            .service
            .update_avatar(
                &user.id,
                Some(Upload {
                    file_name: Some("me.png".into()),
                    bytes: Bytes::from_static(b"\x89PNG"),
                }),
            )
            .await
            .unwrap();
        assert!(updated.avatar.starts_with("http://localhost/media/avatar/"));

        let missing = h.service.update_cover_image(&user.id, None).await;
        assert!(matches!(missing, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn subscriptions_and_channel_profile() {
        let h = harness();
        let ada = h.service.register(ada()).await.unwrap();
        let grace = h
            .service
            .register(RegisterRequest {
                username: "grace".into(),
                email: "grace@x.com".into(),
                fullname: Some("Grace Hopper".into()),
                password: "c0b0l-rules".into(),
            })
            .await
            .unwrap();

        assert!(h.service.toggle_subscription(&grace.id, &ada.id).await.unwrap());

        let profile = h
            .service
            .channel_profile("ada", Some(&grace.id))
            .await
            .unwrap();
        assert_eq!(profile.subscribers_count, 1);
        assert!(profile.is_subscribed);

        let own = h.service.toggle_subscription(&ada.id, &ada.id).await;
        assert!(matches!(own, Err(ApiError::Validation(_))));

        let ghost = h.service.toggle_subscription(&ada.id, "ghost").await;
        assert!(matches!(ghost, Err(ApiError::NotFound(_))));

        let missing = h.service.channel_profile("nobody", None).await;
        assert!(matches!(missing, Err(ApiError::NotFound(m)) if m == "Channel does not exist"));
    }
}
