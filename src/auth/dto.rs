use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Request body for account signup. Fields are optional so missing input maps
/// to a 400 with guidance instead of a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Redacted account projection returned from signup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: SignupUser,
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameRequest {
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckUsernameResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sign-in body, discriminated on the provider tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SignInRequest {
    Credentials { identifier: String, password: String },
    Google { id_token: String },
}

/// Session identity surfaced to the rest of the system.
#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            image: user.image.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub token: String,
    pub user: SessionUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_user_serializes_created_at_camel_case() {
        let user = SignupUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@x.com".into(),
            name: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("password"));
    }

    #[test]
    fn check_username_omits_absent_error() {
        let ok = CheckUsernameResponse {
            available: true,
            username: Some("alice".into()),
            error: None,
        };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"));

        let short = CheckUsernameResponse {
            available: false,
            username: None,
            error: Some("Username must be at least 3 characters long".into()),
        };
        let json = serde_json::to_string(&short).unwrap();
        assert!(json.contains("\"available\":false"));
        assert!(json.contains("at least 3 characters"));
    }

    #[test]
    fn signin_request_deserializes_both_providers() {
        let creds: SignInRequest = serde_json::from_str(
            r#"{"provider":"credentials","identifier":"alice","password":"pw"}"#,
        )
        .unwrap();
        assert!(matches!(creds, SignInRequest::Credentials { .. }));

        let google: SignInRequest =
            serde_json::from_str(r#"{"provider":"google","id_token":"abc"}"#).unwrap();
        assert!(matches!(google, SignInRequest::Google { .. }));
    }
}
