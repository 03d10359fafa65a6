//! Success envelope, session cookies and token extraction.

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

use crate::auth::TokenPair;

pub const ACCESS_COOKIE_NAME: &str = "accessToken";
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// `{"status", "data", "message", "success": true}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            data,
            message: message.into(),
            success: true,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    /// Attach `Set-Cookie` headers. Only ever called on success paths.
    pub fn with_cookies(self, cookies: Vec<HeaderValue>) -> Response {
        let mut response = self.into_response();
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

// ── Cookies ─────────────────────────────────────────────────────────

/// Cookie attributes shared by both session cookies.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl CookiePolicy {
    /// Both cookies for a freshly issued pair.
    pub fn session_cookies(&self, tokens: &TokenPair) -> Vec<HeaderValue> {
        [
            build_cookie(ACCESS_COOKIE_NAME, &tokens.access_token, self.access_ttl.as_secs(), self.secure),
            build_cookie(REFRESH_COOKIE_NAME, &tokens.refresh_token, self.refresh_ttl.as_secs(), self.secure),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Expire both cookies.
    pub fn cleared_cookies(&self) -> Vec<HeaderValue> {
        [
            build_cookie(ACCESS_COOKIE_NAME, "", 0, self.secure),
            build_cookie(REFRESH_COOKIE_NAME, "", 0, self.secure),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn build_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> Option<HeaderValue> {
    let mut cookie =
        format!("{name}={value}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Strict");
    if secure {
        cookie.push_str("; Secure");
    }
    match HeaderValue::from_str(&cookie) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(cookie = name, "Refusing to emit malformed cookie: {e}");
            None
        }
    }
}

// ── Token extraction ────────────────────────────────────────────────

/// Value of the named cookie from any `Cookie` header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Extract bearer token from Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Access token from the cookie, else the `Authorization` header.
pub fn access_token(headers: &HeaderMap) -> Option<&str> {
    get_cookie(headers, ACCESS_COOKIE_NAME).or_else(|| extract_bearer_token(headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(secure: bool) -> CookiePolicy {
        CookiePolicy {
            secure,
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(864_000),
        }
    }

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "aaa.bbb.ccc".into(),
            refresh_token: "ddd.eee.fff".into(),
        }
    }

    #[test]
    fn session_cookies_carry_ttl_and_flags() {
        let cookies = policy(true).session_cookies(&pair());
        assert_eq!(cookies.len(), 2);

        let access = cookies[0].to_str().unwrap();
        assert!(access.starts_with("accessToken=aaa.bbb.ccc;"));
        assert!(access.contains("Max-Age=900"));
        assert!(access.contains("HttpOnly"));
        assert!(access.contains("SameSite=Strict"));
        assert!(access.ends_with("; Secure"));

        let refresh = cookies[1].to_str().unwrap();
        assert!(refresh.starts_with("refreshToken=ddd.eee.fff;"));
        assert!(refresh.contains("Max-Age=864000"));
    }

    #[test]
    fn insecure_policy_omits_secure_flag() {
        let cookies = policy(false).session_cookies(&pair());
        assert!(!cookies[0].to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let cookies = policy(true).cleared_cookies();
        assert_eq!(cookies.len(), 2);
        for cookie in &cookies {
            assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
        }
    }

    #[test]
    fn get_cookie_finds_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=abc; refreshToken=def"),
        );
        assert_eq!(get_cookie(&headers, ACCESS_COOKIE_NAME), Some("abc"));
        assert_eq!(get_cookie(&headers, REFRESH_COOKIE_NAME), Some("def"));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn access_token_prefers_cookie_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(access_token(&headers), Some("from-header"));

        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken=from-cookie"));
        assert_eq!(access_token(&headers), Some("from-cookie"));
    }

    #[test]
    fn bearer_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
