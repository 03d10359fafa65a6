//! `/api/v1/users/*` and `/api/v1/subscriptions/*` handlers.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::response::{access_token, get_cookie, ApiResponse, REFRESH_COOKIE_NAME};
use super::AppState;
use crate::accounts::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateAccountRequest, Upload,
};
use crate::error::{ApiError, ApiResult};
use crate::identity::{ChannelProfile, Identity, PublicIdentity};

/// Multipart field names for the image endpoints.
pub const AVATAR_FIELD: &str = "avatar";
pub const COVER_IMAGE_FIELD: &str = "coverImage";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<PublicIdentity>,
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubscriptionData {
    subscribed: bool,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(b)| b).map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::validation(format!("Invalid request: {}", e.body_text()))
        }
    })
}

/// Resolve the caller from the access-token cookie or bearer header.
async fn require_identity(state: &AppState, headers: &HeaderMap) -> ApiResult<Identity> {
    state.accounts.authenticate(access_token(headers)).await
}

// ── Registration and session ────────────────────────────────────────

/// POST /api/v1/users/register
pub async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<PublicIdentity>> {
    let user = state.accounts.register(json_body(body)?).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

/// POST /api/v1/users/login: sets both session cookies.
pub async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let outcome = state.accounts.login(json_body(body)?).await?;
    let cookies = state.cookies.session_cookies(&outcome.tokens);
    let data = SessionData {
        user: Some(outcome.identity.public()),
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
    };
    Ok(ApiResponse::ok(data, "User logged in successfully").with_cookies(cookies))
}

/// POST /api/v1/users/logout: clears the refresh slot and both cookies.
pub async fn handle_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let identity = require_identity(&state, &headers).await?;
    state.accounts.logout(&identity.id).await?;
    Ok(ApiResponse::ok(serde_json::json!({}), "User logged out")
        .with_cookies(state.cookies.cleared_cookies()))
}

/// POST /api/v1/users/refresh-token: rotates the pair.
pub async fn handle_refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> ApiResult<Response> {
    let from_body = body.ok().and_then(|Json(b)| b.refresh_token);
    let incoming = get_cookie(&headers, REFRESH_COOKIE_NAME).or(from_body.as_deref());

    let tokens = state.accounts.refresh(incoming).await?;
    let cookies = state.cookies.session_cookies(&tokens);
    let data = SessionData {
        user: None,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    };
    Ok(ApiResponse::ok(data, "Access token refreshed").with_cookies(cookies))
}

/// POST /api/v1/users/change-password
pub async fn handle_change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let identity = require_identity(&state, &headers).await?;
    state
        .accounts
        .change_password(&identity, json_body(body)?)
        .await?;
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

// ── Profile ─────────────────────────────────────────────────────────

/// GET /api/v1/users/current-user
pub async fn handle_current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ApiResponse<PublicIdentity>> {
    let identity = require_identity(&state, &headers).await?;
    Ok(ApiResponse::ok(
        identity.public(),
        "Current user fetched successfully",
    ))
}

/// PATCH /api/v1/users/update-account
pub async fn handle_update_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<PublicIdentity>> {
    let identity = require_identity(&state, &headers).await?;
    let user = state
        .accounts
        .update_account(&identity.id, json_body(body)?)
        .await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

/// PATCH /api/v1/users/avatar: multipart field `avatar`.
pub async fn handle_update_avatar(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicIdentity>> {
    let identity = require_identity(&state, &headers).await?;
    let upload = read_upload(multipart, AVATAR_FIELD).await?;
    let user = state.accounts.update_avatar(&identity.id, upload).await?;
    Ok(ApiResponse::ok(user, "Avatar image updated successfully"))
}

/// PATCH /api/v1/users/cover-image: multipart field `coverImage`.
pub async fn handle_update_cover_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicIdentity>> {
    let identity = require_identity(&state, &headers).await?;
    let upload = read_upload(multipart, COVER_IMAGE_FIELD).await?;
    let user = state
        .accounts
        .update_cover_image(&identity.id, upload)
        .await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}

/// First field named `field_name`, if any.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    field_name: &str,
) -> ApiResult<Option<Upload>> {
    let mut multipart =
        multipart.map_err(|e| ApiError::validation(format!("Invalid request: {}", e.body_text())))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(field_name) {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(Upload { file_name, bytes }));
    }
    Ok(None)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(err.body_text())
    }
}

// ── Channels ────────────────────────────────────────────────────────

/// GET /api/v1/users/c/{username}
pub async fn handle_channel_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    let viewer = require_identity(&state, &headers).await?;
    let profile = state
        .accounts
        .channel_profile(&username, Some(&viewer.id))
        .await?;
    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}

/// POST /api/v1/subscriptions/c/{channel_id}
pub async fn handle_toggle_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subscriber = require_identity(&state, &headers).await?;
    let subscribed = state
        .accounts
        .toggle_subscription(&subscriber.id, &channel_id)
        .await?;
    let message = if subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(SubscriptionData { subscribed }, message))
}
