use super::{
    error::{RestError, Result},
    types::*,
};
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AuthState {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            token: None,
            expires_at: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                // Refresh if token expires within 5 minutes
                let refresh_threshold = expires_at - Duration::minutes(5);
                Utc::now() >= refresh_threshold
            }
            None => false,
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.expires_at = parse_token_expiration(&token);
        self.token = Some(token);
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.expires_at = None;
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the `exp` claim of a JWT. Opaque tokens have no expiry.
fn parse_token_expiration(token: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let decoded = BASE64_URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    let payload_json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;

    let exp = payload_json.get("exp")?.as_u64()?;
    DateTime::from_timestamp(exp as i64, 0)
}

/// How the manager obtains its bearer token
#[derive(Debug, Clone)]
enum Credentials {
    /// Static service credential, never refreshed
    ServiceKey,
    /// Admin identity, re-authenticated when the token nears expiry
    Admin { email: String, password: String },
}

pub struct AuthManager {
    client: reqwest::Client,
    base_url: String,
    state: Arc<RwLock<AuthState>>,
    credentials: Option<Credentials>,
}

impl AuthManager {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            state: Arc::new(RwLock::new(AuthState::new())),
            credentials: None,
        }
    }

    /// Use a long-lived service credential for every request
    pub async fn use_service_key(&mut self, key: String) {
        debug!("Using service credential for table API");
        self.credentials = Some(Credentials::ServiceKey);
        self.state.write().await.set_token(key);
    }

    pub async fn authenticate_admin(&mut self, email: String, password: String) -> Result<AuthToken> {
        debug!("Authenticating admin: {}", email);

        let auth_token = self.request_admin_token(&email, &password).await?;
        self.credentials = Some(Credentials::Admin { email, password });
        self.state.write().await.set_token(auth_token.token.clone());

        debug!("Admin authentication successful");
        Ok(auth_token)
    }

    async fn request_admin_token(&self, email: &str, password: &str) -> Result<AuthToken> {
        let auth_request = AuthRequest {
            identity: email.to_string(),
            password: password.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/admins/auth-with-password", self.base_url))
            .json(&auth_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RestError::Authentication(error_text));
        }

        Ok(response.json().await?)
    }

    pub async fn refresh_token(&self) -> Result<Option<AuthToken>> {
        let (email, password) = match &self.credentials {
            Some(Credentials::Admin { email, password }) => (email.clone(), password.clone()),
            Some(Credentials::ServiceKey) => return Ok(None),
            None => {
                warn!("No credentials available for token refresh");
                return Ok(None);
            }
        };

        debug!("Refreshing authentication token");

        let auth_token = match self.request_admin_token(&email, &password).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                return Err(e);
            }
        };

        self.state.write().await.set_token(auth_token.token.clone());

        debug!("Token refresh successful");
        Ok(Some(auth_token))
    }

    pub async fn get_token(&self) -> Option<String> {
        let state = self.state.read().await;
        if state.is_expired() {
            None
        } else {
            state.token.clone()
        }
    }

    pub async fn get_valid_token(&self) -> Result<Option<String>> {
        {
            let state = self.state.read().await;
            if !state.is_authenticated() {
                return Ok(None);
            }
            if !state.is_expired() && !state.needs_refresh() {
                return Ok(state.token.clone());
            }
        }

        if self.refresh_token().await?.is_some() {
            let state = self.state.read().await;
            Ok(state.token.clone())
        } else {
            Err(RestError::TokenExpired)
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        let state = self.state.read().await;
        state.is_authenticated() && !state.is_expired()
    }

    pub async fn logout(&mut self) {
        debug!("Logging out");
        self.state.write().await.clear();
        self.credentials = None;
    }

    pub fn auth_state(&self) -> Arc<RwLock<AuthState>> {
        self.state.clone()
    }
}
