use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::TokenSettings;

/// Environment variables that take priority over `config.toml`.
pub const ENV_ACCESS_TOKEN_SECRET: &str = "VIDGATE_ACCESS_TOKEN_SECRET";
pub const ENV_REFRESH_TOKEN_SECRET: &str = "VIDGATE_REFRESH_TOKEN_SECRET";
pub const ENV_ACCESS_TOKEN_TTL_SECS: &str = "VIDGATE_ACCESS_TOKEN_TTL_SECS";
pub const ENV_REFRESH_TOKEN_TTL_SECS: &str = "VIDGATE_REFRESH_TOKEN_TTL_SECS";
pub const ENV_DATABASE_PATH: &str = "VIDGATE_DATABASE_PATH";
pub const ENV_CORS_ORIGIN: &str = "VIDGATE_CORS_ORIGIN";

/// Top-level configuration, loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

// ── Gateway ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed browser origin for credentialed CORS requests.
    /// `None` mirrors the request origin.
    #[serde(default)]
    pub cors_origin: Option<String>,
    /// JSON / form body limit. Multipart uploads use `media.max_upload_bytes`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Binding to a non-loopback address must be opted into.
    #[serde(default)]
    pub allow_public_bind: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    16 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: None,
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            allow_public_bind: false,
        }
    }
}

// ── Auth ────────────────────────────────────────────────────────

/// Token secrets and lifetimes. Every field except `secure_cookies` is
/// required; see [`Config::token_settings`].
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub access_token_secret: Option<String>,
    #[serde(default)]
    pub refresh_token_secret: Option<String>,
    #[serde(default)]
    pub access_token_ttl_secs: Option<u64>,
    #[serde(default)]
    pub refresh_token_ttl_secs: Option<u64>,
    /// Emit the `Secure` cookie attribute. Only worth turning off for
    /// plain-http local development.
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: None,
            refresh_token_secret: None,
            access_token_ttl_secs: None,
            refresh_token_ttl_secs: None,
            secure_cookies: true,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token_secret", &redact(self.access_token_secret.as_deref()))
            .field("refresh_token_secret", &redact(self.refresh_token_secret.as_deref()))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

fn redact(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "<set>",
        _ => "<unset>",
    }
}

// ── Storage ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding identities and subscriptions. `~` is expanded.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "~/.vidgate/vidgate.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// ── Media ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory uploaded images are written to. `~` is expanded.
    #[serde(default = "default_media_root")]
    pub root_dir: String,
    /// Prefix used to build the public URL of a stored object.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_media_root() -> String {
    "~/.vidgate/media".into()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8000/media".into()
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root_dir: default_media_root(),
            public_base_url: default_public_base_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

impl Config {
    /// Read `path` if it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::info!(
                path = %path.display(),
                "Config file not found, using defaults and environment"
            );
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup. Blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(secret) = get(ENV_ACCESS_TOKEN_SECRET) {
            self.auth.access_token_secret = Some(secret);
        }
        if let Some(secret) = get(ENV_REFRESH_TOKEN_SECRET) {
            self.auth.refresh_token_secret = Some(secret);
        }
        if let Some(raw) = get(ENV_ACCESS_TOKEN_TTL_SECS) {
            self.auth.access_token_ttl_secs = Some(
                raw.parse()
                    .with_context(|| format!("{ENV_ACCESS_TOKEN_TTL_SECS} must be an integer"))?,
            );
        }
        if let Some(raw) = get(ENV_REFRESH_TOKEN_TTL_SECS) {
            self.auth.refresh_token_ttl_secs = Some(
                raw.parse()
                    .with_context(|| format!("{ENV_REFRESH_TOKEN_TTL_SECS} must be an integer"))?,
            );
        }
        if let Some(path) = get(ENV_DATABASE_PATH) {
            self.storage.database_path = path;
        }
        if let Some(origin) = get(ENV_CORS_ORIGIN) {
            self.gateway.cors_origin = Some(origin);
        }
        Ok(())
    }

    /// Validate the token configuration and build the immutable settings
    /// handed to the token manager. Every missing field is reported at once.
    pub fn token_settings(&self) -> Result<TokenSettings> {
        let auth = &self.auth;
        let mut missing = Vec::new();

        let access_secret = non_blank(auth.access_token_secret.as_deref());
        if access_secret.is_none() {
            missing.push("auth.access_token_secret");
        }
        let refresh_secret = non_blank(auth.refresh_token_secret.as_deref());
        if refresh_secret.is_none() {
            missing.push("auth.refresh_token_secret");
        }
        let access_ttl = auth.access_token_ttl_secs.filter(|secs| *secs > 0);
        if access_ttl.is_none() {
            missing.push("auth.access_token_ttl_secs");
        }
        let refresh_ttl = auth.refresh_token_ttl_secs.filter(|secs| *secs > 0);
        if refresh_ttl.is_none() {
            missing.push("auth.refresh_token_ttl_secs");
        }

        match (access_secret, refresh_secret, access_ttl, refresh_ttl) {
            (Some(access_secret), Some(refresh_secret), Some(access_ttl), Some(refresh_ttl)) => {
                if access_secret == refresh_secret {
                    tracing::warn!(
                        "Access and refresh token secrets are identical; token kinds are still \
                         distinguished by their typ claim"
                    );
                }
                if access_ttl >= refresh_ttl {
                    bail!("auth.access_token_ttl_secs must be shorter than auth.refresh_token_ttl_secs");
                }
                Ok(TokenSettings::new(
                    access_secret.as_bytes().to_vec(),
                    refresh_secret.as_bytes().to_vec(),
                    Duration::from_secs(access_ttl),
                    Duration::from_secs(refresh_ttl),
                ))
            }
            _ => bail!(
                "Missing required configuration: {} (set them in config.toml or via {}, {}, {}, {})",
                missing.join(", "),
                ENV_ACCESS_TOKEN_SECRET,
                ENV_REFRESH_TOKEN_SECRET,
                ENV_ACCESS_TOKEN_TTL_SECS,
                ENV_REFRESH_TOKEN_TTL_SECS,
            ),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.storage.database_path)
    }

    pub fn media_root(&self) -> PathBuf {
        expand_path(&self.media.root_dir)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
