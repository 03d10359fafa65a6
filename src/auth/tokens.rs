//! Session token manager: issues and verifies the access/refresh token pair.
//!
//! Tokens are compact HS256 JWTs (`header.payload.signature`, base64url
//! without padding). Access and refresh tokens are signed with different
//! secrets, carry different lifetimes and embed their kind in the `typ`
//! claim, so one can never be accepted in place of the other.
//!
//! The manager is stateless. Whether a refresh token is still the *current*
//! one for an identity is decided by comparing it with the value the caller
//! read from the identity store; the manager never touches storage itself.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const JWT_ALG: &str = "HS256";
const JWT_TYP: &str = "JWT";

/// Which half of the pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims embedded in both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id.
    pub sub: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. The token is rejected once `now >= exp`.
    pub exp: i64,
    /// Random token id; keeps two tokens minted in the same second distinct.
    pub jti: String,
    pub typ: TokenKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Malformed token, bad signature, or a token of the wrong kind.
    #[error("Invalid token")]
    Invalid,
    #[error("Token has expired")]
    Expired,
    /// Well-formed and unexpired, but not the refresh token currently on
    /// record for the identity (rotated away, logged out, or never issued).
    #[error("Refresh token is expired or used")]
    RefreshTokenMismatch,
    /// Signing could not be performed. This is a configuration problem, not
    /// something the client can fix.
    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Immutable secrets and lifetimes, built once from validated configuration.
#[derive(Clone)]
pub struct TokenSettings {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSettings {
    pub fn new(
        access_secret: Vec<u8>,
        refresh_secret: Vec<u8>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

/// A freshly issued pair. The caller must persist `refresh_token` as the
/// identity's current refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug)]
pub struct SessionTokenManager {
    settings: TokenSettings,
}

impl SessionTokenManager {
    pub fn new(settings: TokenSettings) -> Self {
        Self { settings }
    }

    /// Issue a new access/refresh pair for `identity_id`.
    pub fn issue(&self, identity_id: &str) -> Result<TokenPair, TokenError> {
        self.issue_at(identity_id, Utc::now())
    }

    pub fn issue_at(&self, identity_id: &str, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.sign(TokenKind::Access, identity_id, now)?,
            refresh_token: self.sign(TokenKind::Refresh, identity_id, now)?,
        })
    }

    /// Verify an access token and return the identity id it was issued to.
    pub fn verify_access(&self, token: &str) -> Result<String, TokenError> {
        self.verify_access_at(token, Utc::now())
    }

    pub fn verify_access_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        self.decode(TokenKind::Access, token, now)
            .map(|claims| claims.sub)
    }

    /// Verify a refresh token against the value currently stored for its
    /// identity. `stored` is `None` when the identity's slot is empty.
    pub fn verify_refresh(&self, token: &str, stored: Option<&str>) -> Result<String, TokenError> {
        self.verify_refresh_at(token, stored, Utc::now())
    }

    pub fn verify_refresh_at(
        &self,
        token: &str,
        stored: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let token = token.trim();
        let claims = self.decode(TokenKind::Refresh, token, now)?;
        match stored {
            Some(current) if constant_time_eq(current.as_bytes(), token.as_bytes()) => {
                Ok(claims.sub)
            }
            _ => Err(TokenError::RefreshTokenMismatch),
        }
    }

    /// Decode a refresh token's claims without checking the stored value.
    /// Used to find which identity's slot to compare against.
    pub fn refresh_claims(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode(TokenKind::Refresh, token, Utc::now())
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => &self.settings.access_secret,
            TokenKind::Refresh => &self.settings.refresh_secret,
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
        }
    }

    fn sign(&self, kind: TokenKind, identity_id: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let ttl = i64::try_from(self.ttl(kind).as_secs())
            .map_err(|_| TokenError::Signing("token lifetime out of range".into()))?;
        let iat = now.timestamp();
        let claims = Claims {
            sub: identity_id.to_owned(),
            iat,
            exp: iat.saturating_add(ttl),
            jti: uuid::Uuid::new_v4().to_string(),
            typ: kind,
        };
        encode_hs256(self.secret(kind), &claims)
    }

    fn decode(&self, kind: TokenKind, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims: Claims = decode_hs256(self.secret(kind), token)?;
        if claims.typ != kind || claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

// ── Compact HS256 encoding ──────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

fn hmac_for(secret: &[u8]) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(secret).map_err(|e| TokenError::Signing(format!("invalid HMAC key: {e}")))
}

fn encode_hs256<T: Serialize>(secret: &[u8], claims: &T) -> Result<String, TokenError> {
    let header = JwtHeader {
        alg: JWT_ALG.into(),
        typ: JWT_TYP.into(),
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| TokenError::Signing(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );

    let mut mac = hmac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Verify the signature and parse the payload. Expiry is the caller's job.
fn decode_hs256<T: DeserializeOwned>(secret: &[u8], token: &str) -> Result<T, TokenError> {
    let mut parts = token.trim().split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Invalid);
    };

    let header_raw = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| TokenError::Invalid)?;
    let header: JwtHeader = serde_json::from_slice(&header_raw).map_err(|_| TokenError::Invalid)?;
    if header.alg != JWT_ALG || !header.typ.eq_ignore_ascii_case(JWT_TYP) {
        return Err(TokenError::Invalid);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Invalid)?;
    let mut mac = hmac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature).map_err(|_| TokenError::Invalid)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Invalid)?;
    serde_json::from_slice(&payload).map_err(|_| TokenError::Invalid)
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
