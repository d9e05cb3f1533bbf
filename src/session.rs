//! Session context: the signed-in user and UI theme, owned by whoever
//! builds it and passed to the clients that need a token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ForgeError, Result};
use crate::preferences::{AUTH_SESSION, PreferenceStore, Theme};
use crate::services::auth::{AuthClient, AuthSession, AuthUser, TokenProvider};

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

pub struct SessionContext {
    auth: AuthClient,
    prefs: Arc<PreferenceStore>,
    session: RwLock<Option<AuthSession>>,
}

impl SessionContext {
    pub fn new(auth: AuthClient, prefs: Arc<PreferenceStore>) -> Self {
        Self {
            auth,
            prefs,
            session: RwLock::new(None),
        }
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.prefs
    }

    /// Restores the persisted session, refreshing it if it is about to
    /// expire. A session that cannot be refreshed is discarded.
    pub async fn initialize(&self) -> Option<AuthUser> {
        let stored: AuthSession = self.prefs.get(AUTH_SESSION)?;

        let restored = if stored.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
            match self.auth.refresh(&stored.refresh_token).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("Stored session could not be refreshed: {}", e);
                    self.prefs.remove(AUTH_SESSION);
                    return None;
                }
            }
        } else {
            stored
        };

        let user = restored.user.clone();
        self.store(restored).await;
        info!(user_id = %user.id, "Session restored");
        Some(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let session = self.auth.sign_in(email, password).await?;
        let user = session.user.clone();
        self.store(session).await;
        Ok(user)
    }

    /// `None` when the new account still needs email confirmation.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthUser>> {
        let Some(session) = self.auth.sign_up(email, password).await? else {
            return Ok(None);
        };
        let user = session.user.clone();
        self.store(session).await;
        Ok(Some(user))
    }

    /// Clears local state even if the server-side logout fails.
    pub async fn sign_out(&self) {
        let previous = self.session.write().await.take();
        self.prefs.remove(AUTH_SESSION);

        if let Some(session) = previous {
            if let Err(e) = self.auth.sign_out(&session.access_token).await {
                warn!("Server-side sign-out failed: {}", e);
            }
            info!(user_id = %session.user.id, "Signed out");
        }
    }

    pub async fn user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub fn theme(&self) -> Theme {
        self.prefs.theme()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.prefs.set_theme(theme);
    }

    async fn store(&self, session: AuthSession) {
        self.prefs.set(AUTH_SESSION, &session);
        *self.session.write().await = Some(session);
    }
}

#[async_trait]
impl TokenProvider for SessionContext {
    async fn access_token(&self) -> Result<String> {
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);

        {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Err(ForgeError::Unauthenticated),
                Some(s) if !s.expires_within(margin) => return Ok(s.access_token.clone()),
                Some(_) => {}
            }
        }

        let mut session = self.session.write().await;
        let current = session.as_ref().ok_or(ForgeError::Unauthenticated)?;
        // Another caller may have refreshed while we waited for the lock
        if !current.expires_within(margin) {
            return Ok(current.access_token.clone());
        }

        let fresh = self.auth.refresh(&current.refresh_token).await?;
        let token = fresh.access_token.clone();
        self.prefs.set(AUTH_SESSION, &fresh);
        *session = Some(fresh);
        Ok(token)
    }
}
