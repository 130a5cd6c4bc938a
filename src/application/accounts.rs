//! Accounts boundary: signup, login, logout, and session resolution.
//!
//! Identity rides an opaque session token stored server-side; expired or
//! unknown tokens resolve to an anonymous viewer. Credential storage is
//! an argon2 hash in the users table.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::application::repos::{CreateUserParams, RepoError, SessionsRepo, UsersRepo};
use crate::domain::entities::{SessionRecord, UserRecord};
use crate::domain::error::DomainError;
use crate::domain::users::{validate_password, validate_username};

pub const USERNAME_TAKEN_MESSAGE: &str = "A user with that username already exists.";
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Please enter a correct username and password.";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("username already taken")]
    UsernameTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<DomainError> for AccountError {
    fn from(err: DomainError) -> Self {
        AccountError::Validation(err.to_string())
    }
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UsersRepo>,
    sessions: Arc<dyn SessionsRepo>,
    session_ttl: Duration,
}

impl AccountService {
    pub fn new(users: Arc<dyn UsersRepo>, sessions: Arc<dyn SessionsRepo>, ttl_hours: u32) -> Self {
        Self {
            users,
            sessions,
            session_ttl: Duration::hours(i64::from(ttl_hours)),
        }
    }

    /// Register a new account and log it in.
    pub async fn signup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(UserRecord, SessionRecord), AccountError> {
        let username = validate_username(username)?;
        validate_password(password)?;

        let password_hash = hash_password(password)?;
        let user = self
            .users
            .create_user(CreateUserParams {
                username,
                password_hash,
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => AccountError::UsernameTaken,
                other => AccountError::Repo(other),
            })?;

        info!(
            target = "piazza::accounts",
            user_id = user.id,
            username = %user.username,
            "account created"
        );

        let session = self.issue_session(user.id).await?;
        Ok((user, session))
    }

    /// Verify credentials and issue a fresh session. Unknown usernames
    /// and wrong passwords are indistinguishable to the caller.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(UserRecord, SessionRecord), AccountError> {
        let user = self
            .users
            .find_by_username(username.trim())
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !verify_password(&user.password_hash, password) {
            return Err(AccountError::InvalidCredentials);
        }

        let session = self.issue_session(user.id).await?;
        Ok((user, session))
    }

    /// Drop the session row; an unknown token is a no-op.
    pub async fn logout(&self, token: &str) -> Result<(), AccountError> {
        self.sessions.delete_session(token).await?;
        Ok(())
    }

    /// Resolve a session token to its user. Expired and unknown tokens
    /// are anonymous, never errors.
    pub async fn resolve(&self, token: &str) -> Result<Option<UserRecord>, AccountError> {
        let Some(session) = self.sessions.find_session(token).await? else {
            return Ok(None);
        };
        if session.is_expired(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(self.users.find_by_id(session.user_id).await?)
    }

    async fn issue_session(&self, user_id: i64) -> Result<SessionRecord, AccountError> {
        let now = OffsetDateTime::now_utc();
        let session = SessionRecord {
            token: generate_session_token(),
            user_id,
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        self.sessions.insert_session(session.clone()).await?;
        Ok(session)
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AccountError::Hashing(err.to_string()))
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// 64 hex characters derived from two v4 UUIDs; unguessable and safe to
/// embed in a cookie without further encoding.
fn generate_session_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse battery").expect("hashed");
        assert!(verify_password(&hash, "correct horse battery"));
        assert!(!verify_password(&hash, "wrong password"));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn session_tokens_are_unique_and_hex() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
