//! Contract with the hosted auth and table service.
//!
//! This module provides:
//! - `AuthBackend`: the async operations the session store consumes
//! - `AuthEventBus` / `Subscription`: auth-change notification fan-out
//! - `InMemoryBackend`: an in-process implementation for tests and demo mode
//!
//! The HTTP implementation lives in `crate::api`.

pub mod error;
pub mod events;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{AuthSession, Credentials, Identity, ProfileRow};

pub use error::BackendError;
pub use events::{AuthChange, AuthEvent, AuthEventBus, Subscription};
pub use memory::{CallCounts, InMemoryBackend};

/// What the auth service hands back from sign-up and sign-in.
///
/// Sign-up may return an identity without a session while email
/// confirmation is pending.
#[derive(Debug, Clone, Default)]
pub struct AuthResponse {
    pub identity: Option<Identity>,
    pub session: Option<AuthSession>,
}

impl AuthResponse {
    pub fn from_session(session: AuthSession) -> Self {
        Self {
            identity: Some(session.user.clone()),
            session: Some(session),
        }
    }
}

/// Account metadata attached at sign-up.
pub fn signup_metadata(username: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("username".to_string(), Value::String(username.to_string()));
    data.insert("display_name".to_string(), Value::String(username.to_string()));
    data
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The session the service currently holds for this client, if any.
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError>;

    /// Register for auth-change notifications. Dropping the subscription releases it.
    fn on_auth_state_change(&self) -> Subscription;

    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: Map<String, Value>,
    ) -> Result<AuthResponse, BackendError>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Identity attached to the current session, used to source email at read time.
    async fn current_identity(&self) -> Option<Identity>;

    /// Look up a profile row. A missing row is `Ok(None)`.
    async fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>, BackendError>;

    async fn insert_profile(&self, row: &ProfileRow) -> Result<(), BackendError>;
}
