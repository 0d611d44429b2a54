//! Session store: identity and profile state kept in step with the backend.
//!
//! The store is built by the application's composition root and shared by
//! cloning. Consumers read state through `state()` or `watch()`; only the
//! store's own operations mutate it, and every change replaces the whole
//! `SessionState` tuple.
//!
//! All mutations, including those driven by auth-change notifications, run
//! under one async lock, so a notification is applied only after any
//! in-flight sign-up/sign-in/sign-out has finished publishing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{signup_metadata, AuthBackend, AuthChange, BackendError};
use crate::models::{Credentials, Identity, Profile, ProfileRow, SessionState};

use super::error::{AuthError, USERNAME_REQUIRED};

struct Inner {
    backend: Arc<dyn AuthBackend>,
    state: watch::Sender<SessionState>,
    ops: Mutex<()>,
    mounted: Arc<AtomicBool>,
}

/// Holds the current identity, its profile, and the loading flag.
/// Clone is cheap - all clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create an empty store (`loading = true`). Call `mount` to populate it.
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                state,
                ops: Mutex::new(()),
                mounted: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    // ===== Read access =====

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    // ===== Lifecycle =====

    /// Restore the existing session and start listening for auth changes.
    ///
    /// The subscription is taken before the initial query so nothing emitted
    /// in between is lost; queued notifications are applied once the initial
    /// state is published. Dropping the returned guard stops the listener and
    /// releases the subscription.
    ///
    /// Only one listener runs at a time: mounting again while a listener is
    /// active returns an inert guard. Mount again after `unmount`.
    pub async fn mount(&self) -> AuthListener {
        if self.inner.mounted.swap(true, Ordering::AcqRel) {
            warn!("Session store already mounted, ignoring");
            return AuthListener {
                task: None,
                mounted: None,
            };
        }

        let mut subscription = self.inner.backend.on_auth_state_change();

        {
            let _ops = self.inner.ops.lock().await;
            let identity = match self.inner.backend.current_session().await {
                Ok(session) => session.map(|s| s.user),
                Err(e) => {
                    warn!(error = %e, "Failed to restore session");
                    None
                }
            };
            let profile = match identity {
                Some(ref identity) => self.resolve_profile(identity).await,
                None => None,
            };
            debug!(
                authenticated = identity.is_some(),
                has_profile = profile.is_some(),
                "Initial session check complete"
            );
            self.commit(identity, profile);
        }

        let store = self.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                store.apply_change(change).await;
            }
            debug!("Auth change stream closed");
        });

        AuthListener {
            task: Some(task),
            mounted: Some(self.inner.mounted.clone()),
        }
    }

    async fn apply_change(&self, change: AuthChange) {
        let _ops = self.inner.ops.lock().await;
        let identity = change.session.map(|s| s.user);
        debug!(
            event = change.event.as_str(),
            user_id = identity.as_ref().map(|i| i.id.as_str()),
            "Auth state changed"
        );
        let profile = match identity {
            Some(ref identity) => self.resolve_profile(identity).await,
            None => None,
        };
        self.commit(identity, profile);
    }

    // ===== Actions =====

    /// Create an account and its profile row, then publish both.
    ///
    /// An empty username is rejected without contacting the backend.
    /// The published profile is the locally constructed one, not a re-read.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<(), AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation(USERNAME_REQUIRED.to_string()));
        }

        let _ops = self.inner.ops.lock().await;
        let credentials = Credentials::new(email, password);
        let response = self
            .inner
            .backend
            .sign_up(&credentials, signup_metadata(username))
            .await
            .inspect_err(|e| error!(error = %e, "Sign up failed"))?;

        let Some(identity) = response.identity else {
            return Ok(());
        };

        let row = ProfileRow::new(identity.id.clone(), username);
        if let Err(e) = self.inner.backend.insert_profile(&row).await {
            warn!(user_id = %identity.id, error = %e, "Failed to insert profile after sign up");
        }

        let profile = Profile::from_row(row, identity.email.clone());
        info!(user_id = %identity.id, username = %profile.username, "Signed up");
        self.commit(Some(identity), Some(profile));
        Ok(())
    }

    /// Authenticate, make sure a profile exists, then publish both.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _ops = self.inner.ops.lock().await;
        let credentials = Credentials::new(email, password);
        let response = self
            .inner
            .backend
            .sign_in(&credentials)
            .await
            .inspect_err(|e| error!(error = %e, "Sign in failed"))?;

        if let Some(identity) = response.identity {
            let profile = self.resolve_profile(&identity).await;
            info!(user_id = %identity.id, has_profile = profile.is_some(), "Signed in");
            self.commit(Some(identity), profile);
        }
        Ok(())
    }

    /// End the session. Local state is cleared whatever the backend says;
    /// a backend error is still returned for display.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _ops = self.inner.ops.lock().await;
        let result = self.inner.backend.sign_out().await;
        self.commit(None, None);

        match result {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Sign out request failed, local session cleared anyway");
                Err(e.into())
            }
        }
    }

    // ===== Profile resolution =====

    /// Look up the identity's profile without creating one.
    ///
    /// A found profile is published if `identity` is still the current one.
    pub async fn fetch_profile(&self, identity: &Identity) -> Result<Option<Profile>, BackendError> {
        let _ops = self.inner.ops.lock().await;
        let profile = self.lookup_profile(identity).await?;
        if let Some(ref profile) = profile {
            self.commit_profile(profile.clone());
        }
        Ok(profile)
    }

    /// Look up the identity's profile, creating a default one if it has none.
    ///
    /// Idempotent: an existing row is never inserted again. The created
    /// profile is published if `identity` is still the current one.
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<Profile, BackendError> {
        let _ops = self.inner.ops.lock().await;
        let profile = self.ensure_profile_unlocked(identity).await?;
        self.commit_profile(profile.clone());
        Ok(profile)
    }

    async fn lookup_profile(&self, identity: &Identity) -> Result<Option<Profile>, BackendError> {
        let Some(row) = self.inner.backend.get_profile(&identity.id).await? else {
            return Ok(None);
        };

        // Profiles do not store email; attach the current identity's at read time
        let email = match self.inner.backend.current_identity().await {
            Some(current) if current.id == identity.id => current.email,
            _ => identity.email.clone(),
        };
        Ok(Some(Profile::from_row(row, email)))
    }

    async fn ensure_profile_unlocked(&self, identity: &Identity) -> Result<Profile, BackendError> {
        if let Some(existing) = self.lookup_profile(identity).await? {
            return Ok(existing);
        }

        let profile = Profile::default_for(identity);
        match self.inner.backend.insert_profile(&profile.to_row()).await {
            Ok(()) => info!(user_id = %identity.id, username = %profile.username, "Created default profile"),
            Err(e) => warn!(user_id = %identity.id, error = %e, "Failed to create default profile"),
        }
        Ok(profile)
    }

    /// Creation-aware resolution used by every path that publishes an identity.
    /// A failed lookup leaves the profile absent rather than guessing.
    async fn resolve_profile(&self, identity: &Identity) -> Option<Profile> {
        match self.ensure_profile_unlocked(identity).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(user_id = %identity.id, error = %e, "Failed to resolve profile");
                None
            }
        }
    }

    // ===== Publication =====

    /// Replace the whole state. The only place identity changes.
    fn commit(&self, identity: Option<Identity>, profile: Option<Profile>) {
        let profile = profile.filter(|p| identity.as_ref().is_some_and(|i| i.id == p.id));
        self.inner.state.send_replace(SessionState {
            identity,
            profile,
            loading: false,
        });
    }

    /// Publish a profile for the current identity; ignored for anyone else.
    fn commit_profile(&self, profile: Profile) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.identity_id() != Some(profile.id.as_str()) || state.profile.as_ref() == Some(&profile) {
                return false;
            }
            state.profile = Some(profile);
            true
        })
    }
}

/// Owns the store's auth-change listener. Dropping it stops the listener.
pub struct AuthListener {
    task: Option<JoinHandle<()>>,
    mounted: Option<Arc<AtomicBool>>,
}

impl AuthListener {
    /// Stop listening and wait until the subscription has been released.
    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Auth listener unmounted");
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(mounted) = self.mounted.take() {
            mounted.store(false, Ordering::Release);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.release();
    }
}
