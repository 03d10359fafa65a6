//! vidgate: account, session-token and channel-profile backend.
//!
//! Module map:
//! - [`auth`]: access/refresh token manager and password hashing
//! - [`identity`]: identity records and the SQLite-backed store
//! - [`media`]: object store for avatar and cover images
//! - [`accounts`]: use cases tying the three together
//! - [`gateway`]: axum router, handlers and server loop
//! - [`config`]: TOML + environment configuration

pub mod accounts;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod media;

pub use error::{ApiError, ApiResult};
