use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::repo_types::{DuplicateField, NewUser, StoreError, User};

/// Maps a violated unique-index name to the conflicting field.
pub(crate) fn field_for_constraint(name: &str) -> Option<DuplicateField> {
    match name {
        "users_username_key" => Some(DuplicateField::Username),
        "users_email_key" => Some(DuplicateField::Email),
        _ => None,
    }
}

fn classify(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            if let Some(field) = db.constraint().and_then(field_for_constraint) {
                return StoreError::Duplicate(field);
            }
        }
    }
    StoreError::Database(e)
}

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, name, image, provider,
                   email_verified, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by username, case-insensitive.
    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, name, image, provider,
                   email_verified, created_at, updated_at
            FROM users
            WHERE lower(username) = lower($1)
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by email, case-insensitive.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, name, image, provider,
                   email_verified, created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by username or email in one lookup (login identifier).
    pub async fn find_by_identifier(db: &PgPool, identifier: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, name, image, provider,
                   email_verified, created_at, updated_at
            FROM users
            WHERE lower(username) = lower($1) OR lower(email) = lower($1)
            "#,
        )
        .bind(identifier)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn username_taken(db: &PgPool, username: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM users WHERE lower(username) = lower($1))"#,
        )
        .bind(username)
        .fetch_one(db)
        .await?;
        Ok(exists)
    }

    /// Create a new account. The plaintext password, if any, is hashed here and
    /// discarded; only the argon2 PHC string reaches the database. Unique-index
    /// violations come back as `StoreError::Duplicate`.
    pub async fn create(db: &PgPool, new: NewUser) -> Result<User, StoreError> {
        let password_hash = match new.password {
            Some(plain) => Some(hash_password(&plain).map_err(|e| StoreError::Hash(e.to_string()))?),
            None => None,
        };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, name, image, provider, email_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, username, email, password_hash, name, image, provider,
                      email_verified, created_at, updated_at
            "#,
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&password_hash)
        .bind(&new.name)
        .bind(&new.image)
        .bind(new.provider)
        .bind(new.email_verified)
        .fetch_one(db)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    /// Re-tag an existing account as Google-linked: refresh name/image when the
    /// external profile supplies them, stamp the email-verified time. The
    /// password hash is left untouched.
    pub async fn link_google(
        &self,
        db: &PgPool,
        name: Option<&str>,
        image: Option<&str>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET provider = 'google',
                name = COALESCE($2, name),
                image = COALESCE($3, image),
                email_verified = now(),
                updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, password_hash, name, image, provider,
                      email_verified, created_at, updated_at
            "#,
        )
        .bind(self.id)
        .bind(name)
        .bind(image)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}
