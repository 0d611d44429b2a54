//! API client for the hosted auth and table service.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::auth::SessionVault;
use crate::backend::{
    AuthBackend, AuthEvent, AuthEventBus, AuthResponse, BackendError, Subscription,
};
use crate::config::Config;
use crate::models::{AuthSession, Credentials, Identity, ProfileRow};

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of the auth endpoints
const AUTH_PATH: &str = "auth/v1";

/// Path prefix of the table endpoints
const REST_PATH: &str = "rest/v1";

/// Table holding one profile row per identity
const PROFILES_TABLE: &str = "profiles";

/// Header carrying the project's public key on every request
const API_KEY_HEADER: &str = "apikey";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Sign-up answers with a full session when the account is confirmed
/// immediately, or with the bare user while confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpPayload {
    Session(AuthSession),
    User(Identity),
}

/// API client for the hosted service.
pub struct ApiClient {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    vault: Option<SessionVault>,
    bus: AuthEventBus,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            vault: None,
            bus: AuthEventBus::new(),
        })
    }

    /// Build a client from validated configuration, with keychain persistence
    /// when the config asks for it.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let url = config.backend_url.as_deref().unwrap_or_default();
        let key = config.anon_key.as_deref().unwrap_or_default();
        let client = Self::new(url, key, Duration::from_secs(config.request_timeout_secs))?;
        Ok(if config.persist_session {
            client.with_vault(SessionVault::new())
        } else {
            client
        })
    }

    /// Persist sessions through the given vault.
    pub fn with_vault(mut self, vault: SessionVault) -> Self {
        self.vault = Some(vault);
        self
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, AUTH_PATH, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, table)
    }

    // ===== Session bookkeeping =====

    fn held_session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn access_token(&self) -> Option<String> {
        self.held_session().map(|s| s.access_token)
    }

    /// Replace the held session and mirror it to the vault.
    fn set_session(&self, session: Option<AuthSession>) {
        if let Some(ref vault) = self.vault {
            let persisted = match session {
                Some(ref s) => vault.store(s),
                None => vault.clear(),
            };
            if let Err(e) = persisted {
                warn!(error = %e, "Failed to persist session");
            }
        }
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn load_persisted(&self) -> Option<AuthSession> {
        let vault = self.vault.as_ref()?;
        match vault.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                None
            }
        }
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let request = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .headers(self.anon_headers()?)
            .json(&json!({ "refresh_token": refresh_token }));

        let session: AuthSession = Self::send_json(request).await?;
        let session = session.stamped();
        self.set_session(Some(session.clone()));
        info!(user_id = %session.user.id, "Session refreshed");
        self.bus.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    // ===== Request helpers =====

    fn headers_with_bearer(&self, bearer: &str) -> Result<header::HeaderMap, BackendError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(API_KEY_HEADER, Self::header_value(&self.anon_key)?);
        headers.insert(
            header::AUTHORIZATION,
            Self::header_value(&format!("Bearer {}", bearer))?,
        );
        Ok(headers)
    }

    /// Headers for requests made on behalf of the project, not a user.
    fn anon_headers(&self) -> Result<header::HeaderMap, BackendError> {
        self.headers_with_bearer(&self.anon_key)
    }

    /// Headers for table requests: the user's token when signed in, else the anon key.
    fn auth_headers(&self) -> Result<header::HeaderMap, BackendError> {
        match self.access_token() {
            Some(token) => self.headers_with_bearer(&token),
            None => self.anon_headers(),
        }
    }

    fn header_value(value: &str) -> Result<header::HeaderValue, BackendError> {
        header::HeaderValue::from_str(value)
            .map_err(|e| BackendError::InvalidResponse(format!("Invalid header value: {}", e)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::from_status(status, &body))
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().await?;
        Self::check_response(response).await
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
        let response = Self::send(request).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    async fn logout(&self, token: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.auth_url("logout"))
            .headers(self.headers_with_bearer(token)?);
        Self::send(request).await?;
        Ok(())
    }

    fn establish(&self, session: AuthSession) -> AuthResponse {
        let session = session.stamped();
        self.set_session(Some(session.clone()));
        self.bus.emit(AuthEvent::SignedIn, Some(session.clone()));
        AuthResponse::from_session(session)
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let session = match self.held_session() {
            Some(session) => session,
            None => match self.load_persisted() {
                Some(session) => {
                    debug!(user_id = %session.user.id, "Restored persisted session");
                    *self.session.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(session.clone());
                    session
                }
                None => return Ok(None),
            },
        };

        if !session.needs_refresh() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            if session.is_expired() {
                debug!("Held session expired without a refresh token");
                self.set_session(None);
                return Ok(None);
            }
            return Ok(Some(session));
        };

        match self.refresh_session(&refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(e @ (BackendError::Auth(_) | BackendError::Unauthorized)) => {
                warn!(error = %e, "Refresh token rejected, discarding session");
                self.set_session(None);
                Ok(None)
            }
            Err(e) if !session.is_expired() => {
                warn!(error = %e, "Failed to refresh session, keeping current token");
                Ok(Some(session))
            }
            Err(e) => {
                // The vault copy stays so the refresh is retried on the next call
                warn!(error = %e, "Failed to refresh expired session");
                *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
                Ok(None)
            }
        }
    }

    fn on_auth_state_change(&self) -> Subscription {
        self.bus.subscribe()
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: Map<String, Value>,
    ) -> Result<AuthResponse, BackendError> {
        let request = self
            .client
            .post(self.auth_url("signup"))
            .headers(self.anon_headers()?)
            .json(&json!({
                "email": credentials.email,
                "password": credentials.password,
                "data": metadata,
            }));

        match Self::send_json::<SignUpPayload>(request).await? {
            SignUpPayload::Session(session) => Ok(self.establish(session)),
            SignUpPayload::User(identity) => {
                info!(user_id = %identity.id, "Sign up awaiting email confirmation");
                Ok(AuthResponse {
                    identity: Some(identity),
                    session: None,
                })
            }
        }
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, BackendError> {
        let request = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .headers(self.anon_headers()?)
            .json(credentials);

        let session: AuthSession = Self::send_json(request).await?;
        Ok(self.establish(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let result = match self.access_token() {
            Some(token) => self.logout(&token).await,
            None => Ok(()),
        };

        // The local session is dropped even when the logout request fails
        self.set_session(None);
        self.bus.emit(AuthEvent::SignedOut, None);
        result
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.held_session().map(|s| s.user)
    }

    async fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>, BackendError> {
        let filter = format!("eq.{}", id);
        let request = self
            .client
            .get(self.rest_url(PROFILES_TABLE))
            .headers(self.auth_headers()?)
            .query(&[("id", filter.as_str()), ("select", "*")]);

        let rows: Vec<ProfileRow> = Self::send_json(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, row: &ProfileRow) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.rest_url(PROFILES_TABLE))
            .headers(self.auth_headers()?)
            .header("Prefer", "return=minimal")
            .json(row);

        Self::send(request).await?;
        debug!(user_id = %row.id, username = %row.username, "Profile row inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let client = ApiClient::new("https://demo.example.co/", "anon", Duration::from_secs(5))
            .expect("build client");
        assert_eq!(client.auth_url("signup"), "https://demo.example.co/auth/v1/signup");
        assert_eq!(client.rest_url("profiles"), "https://demo.example.co/rest/v1/profiles");
    }

    #[test]
    fn test_parse_signup_payloads() {
        let session = r#"{"access_token":"at","token_type":"bearer","expires_in":3600,"refresh_token":"rt","user":{"id":"u1","email":"a@example.com"}}"#;
        match serde_json::from_str::<SignUpPayload>(session).expect("parse session") {
            SignUpPayload::Session(s) => assert_eq!(s.user.id, "u1"),
            SignUpPayload::User(_) => panic!("expected a session"),
        }

        let pending = r#"{"id":"u2","email":"b@example.com","confirmation_sent_at":"2024-01-01T00:00:00Z"}"#;
        match serde_json::from_str::<SignUpPayload>(pending).expect("parse user") {
            SignUpPayload::User(u) => assert_eq!(u.id, "u2"),
            SignUpPayload::Session(_) => panic!("expected a bare user"),
        }
    }

    #[test]
    fn test_auth_headers_fall_back_to_anon_key() {
        let client = ApiClient::new("https://demo.example.co", "anon-key", Duration::from_secs(5))
            .expect("build client");
        let headers = client.auth_headers().expect("headers");
        assert_eq!(headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()), Some("anon-key"));
        assert_eq!(
            headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer anon-key")
        );
    }
}
