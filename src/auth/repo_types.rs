use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Authentication method associated with an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Provider {
    Credentials,
    Google,
}

/// Account record in the database. Username and email are stored lowercased;
/// `password_hash` is NULL for OAuth-only accounts and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider: Provider,
    pub email_verified: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Input for account creation. `password` is plaintext and is consumed by the
/// store, which persists only the argon2 hash.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider: Provider,
    pub email_verified: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Username,
    Email,
}

impl std::fmt::Display for DuplicateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateField::Username => write!(f, "username"),
            DuplicateField::Email => write!(f, "email"),
        }
    }
}

/// Store failures. A unique-index violation is kept distinct from other
/// database errors so handlers can map it to a user-visible conflict.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(DuplicateField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
}
