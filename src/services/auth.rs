//! Supabase (GoTrue) password authentication and the token seam used by
//! the REST and realtime clients.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::services::api::error_message;

/// Source of bearer tokens. Called once per request or connection attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for service accounts and tests.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(ForgeError::Unauthenticated);
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl AuthSession {
    /// True when the token expires within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at - margin <= Utc::now()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)));

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up either signs the user in directly or waits for email
/// confirmation, in which case no tokens come back.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    Pending(AuthUser),
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    auth_url: String,
    anon_key: String,
}

impl AuthClient {
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        AuthClient {
            client: reqwest::Client::new(),
            auth_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        info!(email, "Signing in");
        self.token_grant("password", json!({ "email": email, "password": password }))
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession> {
        debug!("Refreshing access token");
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    /// Returns `None` when the account still needs email confirmation.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthSession>> {
        let response = self
            .client
            .post(format!("{}/signup", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ForgeError::Auth(error_message(response).await));
        }

        match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session(tokens) => Ok(Some(tokens.into_session())),
            SignUpResponse::Pending(user) => {
                info!(user_id = %user.id, "Sign-up awaiting confirmation");
                Ok(None)
            }
        }
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ForgeError::Auth(error_message(response).await));
        }
        Ok(())
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<AuthSession> {
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ForgeError::Auth(error_message(response).await));
        }

        let tokens: TokenResponse = response.json().await?;
        Ok(tokens.into_session())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken("abc".into()).access_token().await.unwrap(), "abc");
        assert!(matches!(
            StaticToken(String::new()).access_token().await,
            Err(ForgeError::Unauthenticated)
        ));
    }

    #[test]
    fn test_token_response_prefers_expires_at() {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_900_000_000,
            "user": { "id": Uuid::nil(), "email": "writer@example.com" }
        }))
        .unwrap();

        let session = tokens.into_session();
        assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
        assert_eq!(session.user.email.as_deref(), Some("writer@example.com"));
    }

    #[test]
    fn test_expiry_margin() {
        let session = AuthSession {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::seconds(30),
            user: AuthUser {
                id: Uuid::nil(),
                email: None,
            },
        };
        assert!(session.expires_within(Duration::seconds(60)));
        assert!(!session.expires_within(Duration::seconds(5)));
    }

    #[test]
    fn test_sign_up_pending_shape() {
        let parsed: SignUpResponse =
            serde_json::from_value(json!({ "id": Uuid::nil(), "email": "a@b.c" })).unwrap();
        assert!(matches!(parsed, SignUpResponse::Pending(_)));
    }
}
