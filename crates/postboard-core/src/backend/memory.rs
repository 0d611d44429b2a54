//! In-process backend.
//!
//! Behaves like the hosted service closely enough to drive the session
//! store without a network: accounts keyed by login email, a `profiles`
//! table with unique ids and usernames, a held session, and auth-change
//! notifications. Failures can be scripted per operation, and every call is
//! counted so tests can assert on round trips.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use super::{AuthBackend, AuthEvent, AuthEventBus, AuthResponse, BackendError, Subscription};
use crate::models::{AuthSession, Credentials, Identity, ProfileRow};

/// Lifetime of sessions handed out by the in-memory backend
const SESSION_TTL_SECS: i64 = 3600;

/// Mirrors the hosted service's minimum password length
const MIN_PASSWORD_LENGTH: usize = 6;

/// Number of calls made to each backend operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub current_session: usize,
    pub sign_up: usize,
    pub sign_in: usize,
    pub sign_out: usize,
    pub current_identity: usize,
    pub get_profile: usize,
    pub insert_profile: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.current_session
            + self.sign_up
            + self.sign_in
            + self.sign_out
            + self.current_identity
            + self.get_profile
            + self.insert_profile
    }
}

struct Account {
    identity: Identity,
    password: String,
}

#[derive(Default)]
struct Failures {
    next_sign_in: Option<String>,
    sign_out: bool,
    profile_lookups: bool,
    profile_inserts: bool,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, ProfileRow>,
    session: Option<AuthSession>,
    next_user: u64,
    next_token: u64,
    failures: Failures,
    calls: CallCounts,
}

impl MemoryState {
    fn issue_session(&mut self, identity: Identity) -> AuthSession {
        self.next_token += 1;
        AuthSession {
            access_token: format!("access-{}", self.next_token),
            refresh_token: Some(format!("refresh-{}", self.next_token)),
            token_type: "bearer".to_string(),
            expires_in: SESSION_TTL_SECS,
            expires_at: Some(Utc::now().timestamp() + SESSION_TTL_SECS),
            user: identity,
        }
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    bus: AuthEventBus,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an account whose identity carries the login email.
    pub fn register(&self, email: &str, password: &str) -> Identity {
        let mut state = self.lock();
        state.next_user += 1;
        let identity = Identity::new(format!("user-{}", state.next_user), Some(email.to_string()));
        state.accounts.insert(
            email.to_lowercase(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        identity
    }

    /// Create an account that signs in with `login` but exposes `identity` as-is,
    /// e.g. an identity provisioned without an email.
    pub fn register_identity(&self, login: &str, password: &str, identity: Identity) {
        self.lock().accounts.insert(
            login.to_lowercase(),
            Account {
                identity,
                password: password.to_string(),
            },
        );
    }

    /// Seed a profile row directly, bypassing call counting.
    pub fn seed_profile(&self, row: ProfileRow) {
        self.lock().profiles.insert(row.id.clone(), row);
    }

    /// Seed the held session, as if restored from a previous run.
    pub fn seed_session(&self, identity: Identity) -> AuthSession {
        let mut state = self.lock();
        let session = state.issue_session(identity);
        state.session = Some(session.clone());
        session
    }

    /// Simulate a session change made outside this client.
    pub fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        self.lock().session = session.clone();
        self.bus.emit(event, session);
    }

    pub fn fail_next_sign_in(&self, message: &str) {
        self.lock().failures.next_sign_in = Some(message.to_string());
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.lock().failures.sign_out = fail;
    }

    pub fn fail_profile_lookups(&self, fail: bool) {
        self.lock().failures.profile_lookups = fail;
    }

    pub fn fail_profile_inserts(&self, fail: bool) {
        self.lock().failures.profile_inserts = fail;
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn profile(&self, id: &str) -> Option<ProfileRow> {
        self.lock().profiles.get(id).cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.lock().profiles.len()
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.lock().session.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

#[async_trait]
impl AuthBackend for InMemoryBackend {
    async fn current_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let mut state = self.lock();
        state.calls.current_session += 1;
        Ok(state.session.clone())
    }

    fn on_auth_state_change(&self) -> Subscription {
        self.bus.subscribe()
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: Map<String, Value>,
    ) -> Result<AuthResponse, BackendError> {
        let session = {
            let mut state = self.lock();
            state.calls.sign_up += 1;

            let key = credentials.email.to_lowercase();
            if state.accounts.contains_key(&key) {
                return Err(BackendError::Auth("User already registered".to_string()));
            }
            if credentials.password.chars().count() < MIN_PASSWORD_LENGTH {
                return Err(BackendError::Auth(format!(
                    "Password should be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }

            state.next_user += 1;
            let mut identity = Identity::new(
                format!("user-{}", state.next_user),
                Some(credentials.email.clone()),
            );
            identity.user_metadata = metadata;
            identity.created_at = Some(Utc::now());
            state.accounts.insert(
                key,
                Account {
                    identity: identity.clone(),
                    password: credentials.password.clone(),
                },
            );

            let session = state.issue_session(identity);
            state.session = Some(session.clone());
            session
        };

        debug!(user_id = %session.user.id, "Account created");
        self.bus.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(AuthResponse::from_session(session))
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, BackendError> {
        let session = {
            let mut state = self.lock();
            state.calls.sign_in += 1;

            if let Some(message) = state.failures.next_sign_in.take() {
                return Err(BackendError::Unavailable(message));
            }

            let identity = match state.accounts.get(&credentials.email.to_lowercase()) {
                Some(account) if account.password == credentials.password => {
                    account.identity.clone()
                }
                _ => return Err(BackendError::Auth("Invalid login credentials".to_string())),
            };

            let session = state.issue_session(identity);
            state.session = Some(session.clone());
            session
        };

        self.bus.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(AuthResponse::from_session(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let failed = {
            let mut state = self.lock();
            state.calls.sign_out += 1;
            state.session = None;
            state.failures.sign_out
        };

        // The local session is dropped even when the logout request fails
        self.bus.emit(AuthEvent::SignedOut, None);
        if failed {
            return Err(BackendError::Unavailable("logout request failed".to_string()));
        }
        Ok(())
    }

    async fn current_identity(&self) -> Option<Identity> {
        let mut state = self.lock();
        state.calls.current_identity += 1;
        state.session.as_ref().map(|s| s.user.clone())
    }

    async fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>, BackendError> {
        let mut state = self.lock();
        state.calls.get_profile += 1;
        if state.failures.profile_lookups {
            return Err(BackendError::Unavailable("profile lookup failed".to_string()));
        }
        Ok(state.profiles.get(id).cloned())
    }

    async fn insert_profile(&self, row: &ProfileRow) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.calls.insert_profile += 1;
        if state.failures.profile_inserts {
            return Err(BackendError::Unavailable("profile insert failed".to_string()));
        }
        if state.profiles.contains_key(&row.id) {
            return Err(BackendError::Auth(
                "duplicate key value violates unique constraint \"profiles_pkey\"".to_string(),
            ));
        }
        if state.profiles.values().any(|p| p.username == row.username) {
            return Err(BackendError::Auth(
                "duplicate key value violates unique constraint \"profiles_username_key\""
                    .to_string(),
            ));
        }
        state.profiles.insert(row.id.clone(), row.clone());
        Ok(())
    }
}
