//! Credentials and session tokens.
//!
//! Provides:
//! - Access/refresh token issuance, verification and rotation checks (HS256)
//! - Password hashing (Argon2id, PHC strings with embedded salt)
//!
//! ## Design Decisions
//! - The token manager is stateless. The identity store is the authority on
//!   which refresh token is current, so revocation is "overwrite or clear
//!   the stored value".
//! - Access and refresh tokens use separate secrets and lifetimes, loaded
//!   once at startup into an immutable [`TokenSettings`].

pub mod password;
pub mod tokens;

pub use tokens::{Claims, SessionTokenManager, TokenError, TokenKind, TokenPair, TokenSettings};
