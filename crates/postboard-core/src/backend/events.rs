//! Auth-change notifications.
//!
//! Backends own an `AuthEventBus` and hand out one `Subscription` per
//! `on_auth_state_change` call. A subscription is a `Stream` of
//! `AuthChange` values; dropping it (or calling `unsubscribe`) removes the
//! subscriber from the bus.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::AuthSession;

/// Session transitions reported by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl AuthEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession => "INITIAL_SESSION",
            AuthEvent::SignedIn => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEvent::UserUpdated => "USER_UPDATED",
        }
    }
}

/// One notification: the event and the session after it.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<AuthSession>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<AuthChange>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out of auth changes to every live subscription.
#[derive(Clone, Default)]
pub struct AuthEventBus {
    registry: Arc<Mutex<Registry>>,
}

impl AuthEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.senders.insert(id, tx);
        debug!(subscription = id, "Auth subscription registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            rx,
        }
    }

    /// Deliver a change to all subscribers, pruning any whose receiver is gone.
    pub fn emit(&self, event: AuthEvent, session: Option<AuthSession>) {
        let change = AuthChange { event, session };
        let mut registry = lock(&self.registry);
        registry
            .senders
            .retain(|_, tx| tx.send(change.clone()).is_ok());
        debug!(event = event.as_str(), subscribers = registry.senders.len(), "Auth change emitted");
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).senders.len()
    }
}

/// Handle for one registered auth-change listener.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    rx: mpsc::UnboundedReceiver<AuthChange>,
}

impl Subscription {
    /// Wait for the next change. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.rx.recv().await
    }

    /// Release the subscription now rather than at drop.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).senders.remove(&self.id);
            debug!(subscription = self.id, "Auth subscription released");
        }
    }
}

impl Stream for Subscription {
    type Item = AuthChange;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
