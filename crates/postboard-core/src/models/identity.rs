use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Refresh sessions this many seconds before the server-side expiry.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

/// An authenticated principal as issued by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "Record<string, unknown>"))]
    pub user_metadata: Map<String, Value>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "Record<string, unknown>"))]
    pub app_metadata: Map<String, Value>,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            user_metadata: Map::new(),
            app_metadata: Map::new(),
            created_at: None,
        }
    }

    /// Read a string value out of the account metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).and_then(Value::as_str)
    }
}

/// Email/password pair sent to the auth service.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Token bundle for a signed-in identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// Unix seconds. Filled in on receipt when the server leaves it out.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl AuthSession {
    /// Stamp `expires_at` from `expires_in` if the server did not send it.
    pub fn stamped(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now().timestamp() >= at,
            None => false,
        }
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now().timestamp() >= at - TOKEN_REFRESH_BUFFER_SECS,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<i64>) -> AuthSession {
        AuthSession {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            expires_at,
            user: Identity::new("u1", None),
        }
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now().timestamp();
        assert!(!session(Some(now + 3600)).is_expired());
        assert!(!session(Some(now + 3600)).needs_refresh());

        // Inside the refresh buffer but not yet expired
        assert!(!session(Some(now + 30)).is_expired());
        assert!(session(Some(now + 30)).needs_refresh());

        assert!(session(Some(now - 1)).is_expired());
        assert!(!session(None).is_expired());
    }

    #[test]
    fn test_stamped_fills_expires_at() {
        let stamped = session(None).stamped();
        let at = stamped.expires_at.expect("expires_at should be stamped");
        assert!(at > Utc::now().timestamp() + 3500);

        let kept = session(Some(42)).stamped();
        assert_eq!(kept.expires_at, Some(42));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("bob@example.com", "hunter22"));
        assert!(debug.contains("bob@example.com"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_parse_user_payload() {
        let json = r#"{"id":"8f1c","aud":"authenticated","email":"bob@example.com","user_metadata":{"username":"bob"},"app_metadata":{"provider":"email"},"created_at":"2024-03-01T12:00:00Z"}"#;
        let identity: Identity = serde_json::from_str(json).expect("parse identity");
        assert_eq!(identity.id, "8f1c");
        assert_eq!(identity.email.as_deref(), Some("bob@example.com"));
        assert_eq!(identity.metadata_str("username"), Some("bob"));
        assert!(identity.created_at.is_some());
    }
}
