use anyhow::bail;
use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::auth::repo_types::{DuplicateField, NewUser, Provider, StoreError, User};
use crate::error::ApiError;

/// Upper bound on username candidates tried when deriving a username from an
/// OAuth profile. Past this the sign-in fails with `UsernameExhausted` rather
/// than scanning forever.
pub const MAX_USERNAME_ATTEMPTS: usize = 1000;

/// Verified identity claims from Google. Only constructed after the provider
/// has attested the email.
#[derive(Debug, Clone)]
pub struct GoogleProfile {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait]
pub trait GoogleVerifier: Send + Sync {
    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<GoogleProfile>;
}

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, serde::Deserialize)]
struct TokenInfo {
    aud: String,
    email: String,
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies Google ID tokens against the tokeninfo endpoint.
pub struct GoogleTokenClient {
    http: reqwest::Client,
    client_id: String,
}

impl GoogleTokenClient {
    pub fn new(client_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.to_string(),
        }
    }
}

#[async_trait]
impl GoogleVerifier for GoogleTokenClient {
    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<GoogleProfile> {
        let info: TokenInfo = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if info.aud != self.client_id {
            bail!("token audience mismatch");
        }
        if info.email_verified.as_deref() != Some("true") {
            bail!("email not verified by provider");
        }

        Ok(GoogleProfile {
            email: info.email,
            name: info.name,
            picture: info.picture,
        })
    }
}

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 30;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Candidate usernames derived from an email local part: `base`, `base1`,
/// `base2`, ... capped at `MAX_USERNAME_ATTEMPTS`. The base is truncated per
/// candidate so base plus suffix never exceeds the 30-char account limit.
pub fn username_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(truncate_chars(base, MAX_USERNAME_LEN)).chain(
        (1..MAX_USERNAME_ATTEMPTS).map(move |n| {
            let suffix = n.to_string();
            format!(
                "{}{}",
                truncate_chars(base, MAX_USERNAME_LEN - suffix.len()),
                suffix
            )
        }),
    )
}

/// Lowercased email local part, normalized to the 3-30 char username bounds.
/// Locals too short to be a username fall back to `user`.
fn base_username(email: &str) -> String {
    let base = email
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if base.chars().count() < MIN_USERNAME_LEN {
        "user".to_string()
    } else {
        truncate_chars(&base, MAX_USERNAME_LEN)
    }
}

/// Finds-or-creates the local account for a verified Google identity.
/// Re-sign-in updates the existing account in place; first sign-in creates one
/// with a derived unique username and no password.
pub async fn link_google_account(db: &PgPool, profile: &GoogleProfile) -> Result<User, ApiError> {
    let email = profile.email.trim().to_lowercase();

    if let Some(user) = User::find_by_email(db, &email).await? {
        let user = user
            .link_google(db, profile.name.as_deref(), profile.picture.as_deref())
            .await?;
        info!(user_id = %user.id, "google account re-linked");
        return Ok(user);
    }

    let base = base_username(&email);
    for candidate in username_candidates(&base) {
        if User::username_taken(db, &candidate).await? {
            continue;
        }
        let new = NewUser {
            username: candidate,
            email: email.clone(),
            password: None,
            name: profile.name.clone(),
            image: profile.picture.clone(),
            provider: Provider::Google,
            email_verified: Some(OffsetDateTime::now_utc()),
        };
        match User::create(db, new).await {
            Ok(user) => {
                info!(user_id = %user.id, username = %user.username, "google account created");
                return Ok(user);
            }
            // lost the race for this username, try the next candidate
            Err(StoreError::Duplicate(DuplicateField::Username)) => continue,
            // a concurrent first sign-in with the same email won; link its row
            Err(StoreError::Duplicate(DuplicateField::Email)) => {
                if let Some(user) = User::find_by_email(db, &email).await? {
                    let user = user
                        .link_google(db, profile.name.as_deref(), profile.picture.as_deref())
                        .await?;
                    return Ok(user);
                }
                return Err(ApiError::Conflict("Email is already registered".into()));
            }
            Err(e) => return Err(ApiError::Internal(e.into())),
        }
    }

    warn!(base = %base, "username candidates exhausted");
    Err(ApiError::UsernameExhausted)
}
