//! SQLite-backed identity store.
//!
//! Tables:
//! - `users`: id, username, email, fullname, avatar, cover_image,
//!   password_hash, refresh_token, created_at, updated_at
//! - `subscriptions`: subscriber_id, channel_id, created_at

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::path::Path;

use super::{
    normalize_handle, ChannelProfile, Identity, IdentityStore, NewIdentity, StoreError,
    StoreResult,
};
use crate::auth::password;

const USER_COLUMNS: &str = "id, username, email, fullname, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";

pub struct SqliteIdentityStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteIdentityStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    /// In-memory store (tests and throwaway runs).
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn with_connection(conn: rusqlite::Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                fullname TEXT NOT NULL,
                avatar TEXT NOT NULL DEFAULT '',
                cover_image TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                refresh_token TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                subscriber_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                channel_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (subscriber_id, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Count registered identities.
    pub fn user_count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Synchronous helpers ─────────────────────────────────────────
    //
    // The connection guard never lives across an `.await`; the async trait
    // methods below do any blocking hashing first, then call into these.

    fn query_one(&self, filter: &str, params: impl rusqlite::Params) -> StoreResult<Option<Identity>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter}");
        Ok(conn.query_row(&sql, params, row_to_identity).optional()?)
    }

    fn require(&self, id: &str) -> StoreResult<Identity> {
        self.query_one("id = ?1", rusqlite::params![id])?
            .ok_or(StoreError::NotFound)
    }

    fn insert(&self, new: &NewIdentity, password_hash: &str) -> StoreResult<Identity> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = epoch_secs();
        {
            let conn = self.conn.lock();
            let result = conn.execute(
                "INSERT INTO users (id, username, email, fullname, avatar, cover_image,
                                    password_hash, refresh_token, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)",
                rusqlite::params![
                    id,
                    normalize_handle(&new.username),
                    normalize_handle(&new.email),
                    new.fullname.trim(),
                    new.avatar,
                    new.cover_image,
                    password_hash,
                    now,
                ],
            );

            match result {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::Conflict(
                        "User with email or username already exists".into(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(user_id = %id, "Identity created");
        self.require(&id)
    }

    fn update_column(&self, id: &str, column: &str, value: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock();
        let sql = format!("UPDATE users SET {column} = ?2, updated_at = ?3 WHERE id = ?1");
        let changed = conn.execute(&sql, rusqlite::params![id, value, epoch_secs()])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn swap_refresh_token_sync(&self, id: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET refresh_token = ?3, updated_at = ?4
             WHERE id = ?1 AND refresh_token = ?2",
            rusqlite::params![id, expected, new, epoch_secs()],
        )?;
        Ok(changed == 1)
    }

    fn update_account_sync(&self, id: &str, fullname: &str, email: &str) -> StoreResult<Identity> {
        {
            let conn = self.conn.lock();
            let result = conn.execute(
                "UPDATE users SET fullname = ?2, email = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, fullname.trim(), normalize_handle(email), epoch_secs()],
            );
            match result {
                Ok(0) => return Err(StoreError::NotFound),
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::Conflict("Email is already in use".into()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.require(id)
    }

    fn toggle_subscription_sync(&self, subscriber_id: &str, channel_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
            rusqlite::params![subscriber_id, channel_id],
        )?;
        if removed > 0 {
            return Ok(false);
        }

        let result = conn.execute(
            "INSERT INTO subscriptions (subscriber_id, channel_id, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![subscriber_id, channel_id, epoch_secs()],
        );
        match result {
            Ok(_) => Ok(true),
            // Foreign key failure: one side does not exist.
            Err(e) if is_constraint_violation(&e) => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn channel_profile_sync(
        &self,
        username: &str,
        viewer_id: Option<&str>,
    ) -> StoreResult<Option<ChannelProfile>> {
        let conn = self.conn.lock();
        let profile = conn
            .query_row(
                "SELECT u.id, u.username, u.fullname, u.email, u.avatar, u.cover_image,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                        EXISTS (SELECT 1 FROM subscriptions s
                                WHERE s.channel_id = u.id AND s.subscriber_id = ?2)
                 FROM users u
                 WHERE u.username = ?1",
                rusqlite::params![normalize_handle(username), viewer_id],
                |row| {
                    Ok(ChannelProfile {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        fullname: row.get(2)?,
                        email: row.get(3)?,
                        avatar: row.get(4)?,
                        cover_image: row.get(5)?,
                        subscribers_count: row.get::<_, i64>(6)? as u64,
                        channels_subscribed_to_count: row.get::<_, i64>(7)? as u64,
                        is_subscribed: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<Identity>> {
        let username = username.map(normalize_handle);
        let email = email.map(normalize_handle);
        self.query_one(
            "username = ?1 OR email = ?2",
            rusqlite::params![username, email],
        )
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
        self.query_one("id = ?1", rusqlite::params![id])
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Identity>> {
        self.query_one("username = ?1", rusqlite::params![normalize_handle(username)])
    }

    async fn create(&self, new: NewIdentity) -> StoreResult<Identity> {
        let password_hash = hash_off_thread(new.password.clone()).await?;
        self.insert(&new, &password_hash)
    }

    async fn update_refresh_token(&self, id: &str, token: Option<&str>) -> StoreResult<()> {
        self.update_column(id, "refresh_token", token)
    }

    async fn swap_refresh_token(&self, id: &str, expected: &str, new: &str) -> StoreResult<bool> {
        self.swap_refresh_token_sync(id, expected, new)
    }

    async fn verify_password(&self, identity: &Identity, plaintext: &str) -> bool {
        let stored = identity.password_hash.clone();
        let plaintext = plaintext.to_owned();
        match tokio::task::spawn_blocking(move || password::verify_password(&plaintext, &stored))
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!("Password verification task failed: {e}");
                false
            }
        }
    }

    async fn update_password(&self, id: &str, plaintext: &str) -> StoreResult<()> {
        let password_hash = hash_off_thread(plaintext.to_owned()).await?;
        self.update_column(id, "password_hash", Some(&password_hash))
    }

    async fn update_account(&self, id: &str, fullname: &str, email: &str) -> StoreResult<Identity> {
        self.update_account_sync(id, fullname, email)
    }

    async fn update_avatar(&self, id: &str, url: &str) -> StoreResult<Identity> {
        self.update_column(id, "avatar", Some(url))?;
        self.require(id)
    }

    async fn update_cover_image(&self, id: &str, url: &str) -> StoreResult<Identity> {
        self.update_column(id, "cover_image", Some(url))?;
        self.require(id)
    }

    async fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> StoreResult<bool> {
        self.toggle_subscription_sync(subscriber_id, channel_id)
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer_id: Option<&str>,
    ) -> StoreResult<Option<ChannelProfile>> {
        self.channel_profile_sync(username, viewer_id)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_off_thread(plaintext: String) -> StoreResult<String> {
    tokio::task::spawn_blocking(move || password::hash_password(&plaintext))
        .await
        .map_err(|e| StoreError::PasswordHash(e.to_string()))?
        .map_err(|e| StoreError::PasswordHash(e.to_string()))
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        fullname: row.get(3)?,
        avatar: row.get(4)?,
        cover_image: row.get(5)?,
        password_hash: row.get(6)?,
        refresh_token: row.get(7)?,
        created_at: from_epoch(row.get(8)?),
        updated_at: from_epoch(row.get(9)?),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn epoch_secs() -> i64 {
    Utc::now().timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ── Tests ───────────────────────────────────────────────────────────
