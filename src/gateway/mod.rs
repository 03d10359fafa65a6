//! HTTP gateway: axum router, middleware layers and the server loop.
//!
//! Handlers decode requests, call into [`AccountService`] and wrap the
//! result in the success envelope; errors become the error envelope via
//! [`ApiError`](crate::error::ApiError). Session cookies are only ever set
//! on success responses.

pub mod response;
pub mod users;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::accounts::AccountService;
use crate::auth::SessionTokenManager;
use crate::config::{Config, GatewayConfig};
use crate::identity::SqliteIdentityStore;
use crate::media::LocalObjectStore;
use response::CookiePolicy;

/// Slack on top of the media limit for multipart framing and other fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub cookies: CookiePolicy,
}

impl AppState {
    /// Wire the store, token manager and object store from configuration.
    /// Fails if the token configuration is incomplete.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.token_settings()?;
        let cookies = CookiePolicy {
            secure: config.auth.secure_cookies,
            access_ttl: settings.access_ttl(),
            refresh_ttl: settings.refresh_ttl(),
        };

        let db_path = config.database_path();
        let store = SqliteIdentityStore::open(&db_path)
            .with_context(|| format!("Failed to open identity store at {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), users = store.user_count()?, "Identity store ready");

        let media = LocalObjectStore::new(
            config.media_root(),
            &config.media.public_base_url,
            config.media.max_upload_bytes,
        );

        let accounts = AccountService::new(
            Arc::new(store),
            Arc::new(SessionTokenManager::new(settings)),
            Arc::new(media),
        );
        Ok(Self { accounts, cookies })
    }
}

/// True unless `host` is a loopback name or address.
pub fn is_public_bind(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

fn cors_layer(gateway: &GatewayConfig) -> Result<CorsLayer> {
    let origin = match gateway.cors_origin.as_deref() {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid gateway.cors_origin: {origin}"))?,
        ),
        None => AllowOrigin::mirror_request(),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600)))
}

/// Build the full router. Upload routes get their own body limit; every
/// other route is held to `gateway.max_body_bytes`.
pub fn build_router(state: AppState, config: &Config) -> Result<Router> {
    let upload_limit = config.media.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let uploads = Router::new()
        .route("/users/avatar", patch(users::handle_update_avatar))
        .route("/users/cover-image", patch(users::handle_update_cover_image))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit));

    let api = Router::new()
        .route("/users/register", post(users::handle_register))
        .route("/users/login", post(users::handle_login))
        .route("/users/logout", post(users::handle_logout))
        .route("/users/refresh-token", post(users::handle_refresh_token))
        .route("/users/change-password", post(users::handle_change_password))
        .route("/users/current-user", get(users::handle_current_user))
        .route("/users/update-account", patch(users::handle_update_account))
        .route("/users/c/{username}", get(users::handle_channel_profile))
        .route(
            "/subscriptions/c/{channel_id}",
            post(users::handle_toggle_subscription),
        )
        .layer(RequestBodyLimitLayer::new(config.gateway.max_body_bytes))
        .merge(uploads);

    Ok(Router::new()
        .route("/health", get(handle_health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors_layer(&config.gateway)?)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.gateway.request_timeout_secs),
        )))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the gateway would be reachable from other machines.\n\
             Fix: use --host 127.0.0.1 (default) or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let state = AppState::from_config(&config)?;
    let app = build_router(state, &config)?;

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(address = %local, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

/// GET /health: always public
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::TokenSettings;
    use tempfile::TempDir;

    /// State over an in-memory store and a temp media directory.
    pub fn test_state() -> (AppState, TempDir) {
        let media_dir = TempDir::new().unwrap();
        let settings = TokenSettings::new(
            b"gateway-access-secret".to_vec(),
            b"gateway-refresh-secret".to_vec(),
            Duration::from_secs(900),
            Duration::from_secs(864_000),
        );
        let cookies = CookiePolicy {
            secure: true,
            access_ttl: settings.access_ttl(),
            refresh_ttl: settings.refresh_ttl(),
        };
        let accounts = AccountService::new(
            Arc::new(SqliteIdentityStore::in_memory().unwrap()),
            Arc::new(SessionTokenManager::new(settings)),
            Arc::new(LocalObjectStore::new(
                media_dir.path(),
                "http://localhost/media",
                4096,
            )),
        );
        (AppState { accounts, cookies }, media_dir)
    }
}
