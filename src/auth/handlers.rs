use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            CheckUsernameRequest, CheckUsernameResponse, SessionUser, SignInRequest,
            SignInResponse, SignupRequest, SignupResponse, SignupUser,
        },
        jwt::{AuthUser, JwtKeys},
        oauth::link_google_account,
        password::verify_password,
        repo_types::{DuplicateField, NewUser, Provider, StoreError, User},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/check-username", post(check_username))
        .route("/auth/signin", post(signin))
        .route("/auth/session", get(session))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Normalizes signup input; `None` when any field is absent or blank.
fn signup_fields(payload: SignupRequest) -> Option<(String, String, String)> {
    let username = payload.username?.trim().to_lowercase();
    let email = payload.email?.trim().to_lowercase();
    let password = payload.password?;
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return None;
    }
    Some((username, email, password))
}

// Lengths are counted in characters, not bytes.
fn validate_signup(username: &str, email: &str, password: &str) -> Result<(), ApiError> {
    let username_len = username.chars().count();
    if username_len < 3 {
        return Err(ApiError::Validation(
            "Username must be at least 3 characters long".into(),
        ));
    }
    if username_len > 30 {
        return Err(ApiError::Validation(
            "Username must be at most 30 characters long".into(),
        ));
    }
    if password.chars().count() < 6 {
        return Err(ApiError::Validation(
            "Password must be at least 6 characters long".into(),
        ));
    }
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Invalid email address".into()));
    }
    Ok(())
}

fn conflict_message(field: DuplicateField) -> &'static str {
    match field {
        DuplicateField::Username => "Username is already taken",
        DuplicateField::Email => "Email is already registered",
    }
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let Some((username, email, password)) = signup_fields(payload) else {
        warn!("signup with missing fields");
        return Err(ApiError::Validation("Missing required fields".into()));
    };
    validate_signup(&username, &email, &password)?;

    // Sequential availability checks keep the error messages specific; the
    // unique indexes remain the authority under concurrent signups.
    if User::find_by_username(&state.db, &username).await?.is_some() {
        warn!(username = %username, "username already taken");
        return Err(ApiError::Conflict(
            conflict_message(DuplicateField::Username).into(),
        ));
    }
    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict(
            conflict_message(DuplicateField::Email).into(),
        ));
    }

    let new = NewUser {
        username,
        email,
        password: Some(password),
        name: None,
        image: None,
        provider: Provider::Credentials,
        email_verified: None,
    };
    let user = match User::create(&state.db, new).await {
        Ok(u) => u,
        Err(StoreError::Duplicate(field)) => {
            warn!(field = %field, "duplicate key on signup insert");
            return Err(ApiError::Conflict(conflict_message(field).into()));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(ApiError::Internal(e.into()));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created successfully".into(),
            user: SignupUser {
                id: user.id,
                username: user.username,
                email: user.email,
                name: user.name,
                created_at: user.created_at,
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn check_username(
    State(state): State<AppState>,
    Json(payload): Json<CheckUsernameRequest>,
) -> Result<Json<CheckUsernameResponse>, ApiError> {
    let username = payload
        .username
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let Some(username) = username else {
        return Err(ApiError::Validation("Username is required".into()));
    };

    // Too-short names report unavailable with guidance, not an error status.
    if username.chars().count() < 3 {
        return Ok(Json(CheckUsernameResponse {
            available: false,
            username: None,
            error: Some("Username must be at least 3 characters long".into()),
        }));
    }

    let taken = User::username_taken(&state.db, &username).await?;
    Ok(Json(CheckUsernameResponse {
        available: !taken,
        username: Some(username),
        error: None,
    }))
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, ApiError> {
    let user = match payload {
        SignInRequest::Credentials {
            identifier,
            password,
        } => {
            let identifier = identifier.trim().to_lowercase();
            let user = User::find_by_identifier(&state.db, &identifier).await?;
            // Unknown identifier, passwordless (OAuth-only) account and wrong
            // password all collapse to the same generic failure.
            let user = match user {
                Some(u) => u,
                None => {
                    warn!("sign-in for unknown identifier");
                    return Err(ApiError::InvalidCredentials);
                }
            };
            let Some(hash) = user.password_hash.as_deref() else {
                warn!(user_id = %user.id, "sign-in against passwordless account");
                return Err(ApiError::InvalidCredentials);
            };
            if !verify_password(&password, hash)? {
                warn!(user_id = %user.id, "sign-in with wrong password");
                return Err(ApiError::InvalidCredentials);
            }
            user
        }
        SignInRequest::Google { id_token } => {
            let profile = state.google.verify_id_token(&id_token).await.map_err(|e| {
                warn!(error = %e, "google token verification failed");
                ApiError::UpstreamProvider("Google sign-in failed".into())
            })?;
            link_google_account(&state.db, &profile).await?
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.username)?;
    info!(user_id = %user.id, provider = ?user.provider, "user signed in");
    Ok(Json(SignInResponse {
        token,
        user: SessionUser::from(&user),
    }))
}

#[instrument(skip(state))]
pub async fn session(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<SessionUser>, ApiError> {
    let user = User::find_by_id(&state.db, claims.sub).await?;
    let user = match user {
        Some(u) => u,
        None => {
            warn!(user_id = %claims.sub, "session token for missing user");
            return Err(ApiError::InvalidCredentials);
        }
    };
    Ok(Json(SessionUser::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_username_rejected_first() {
        let err = validate_signup("ab", "a@x.com", "secret1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Username must be at least 3 characters long"
        );
    }

    #[test]
    fn overlong_username_rejected() {
        let name = "a".repeat(31);
        let err = validate_signup(&name, "a@x.com", "secret1").unwrap_err();
        assert_eq!(err.to_string(), "Username must be at most 30 characters long");
    }

    #[test]
    fn five_char_password_rejected() {
        let err = validate_signup("alice", "alice@x.com", "abc12").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Password must be at least 6 characters long"
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_email_rejected() {
        let err = validate_signup("alice", "not-an-email", "secret1").unwrap_err();
        assert_eq!(err.to_string(), "Invalid email address");
    }

    #[test]
    fn valid_signup_passes() {
        assert!(validate_signup("alice", "alice@x.com", "secret1").is_ok());
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let payload = SignupRequest {
            username: Some("".into()),
            email: Some("alice@x.com".into()),
            password: Some("secret1".into()),
        };
        assert!(signup_fields(payload).is_none());

        let payload = SignupRequest {
            username: Some("alice".into()),
            email: Some("   ".into()),
            password: Some("secret1".into()),
        };
        assert!(signup_fields(payload).is_none());

        let payload = SignupRequest {
            username: Some("alice".into()),
            email: Some("alice@x.com".into()),
            password: Some("".into()),
        };
        assert!(signup_fields(payload).is_none());
    }

    #[test]
    fn present_fields_are_trimmed_and_lowercased() {
        let payload = SignupRequest {
            username: Some("  Alice ".into()),
            email: Some(" Alice@X.com ".into()),
            password: Some("secret1".into()),
        };
        let (username, email, password) = signup_fields(payload).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(email, "alice@x.com");
        assert_eq!(password, "secret1");
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        // 16 chars but 48 bytes; must pass the 30-char maximum
        let wide = "ユ".repeat(16);
        assert!(validate_signup(&wide, "a@x.com", "secret1").is_ok());

        // 2 chars but 6 bytes; still below the 3-char minimum
        let err = validate_signup("ユー", "a@x.com", "secret1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Username must be at least 3 characters long"
        );

        // 5 chars but 15 bytes; still below the 6-char password minimum
        let err = validate_signup("alice", "a@x.com", "ありがとう").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Password must be at least 6 characters long"
        );
    }

    #[test]
    fn email_regex_accepts_and_rejects() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("user@nodot"));
    }

    #[test]
    fn conflict_messages_match_fields() {
        assert_eq!(
            conflict_message(DuplicateField::Username),
            "Username is already taken"
        );
        assert_eq!(
            conflict_message(DuplicateField::Email),
            "Email is already registered"
        );
    }
}
