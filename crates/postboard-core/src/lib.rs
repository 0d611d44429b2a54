//! Postboard core - session state layer for the Postboard mobile client.
//!
//! This crate keeps the signed-in identity and its profile in sync with the
//! hosted auth/table service and exposes sign-up, sign-in and sign-out to
//! the UI:
//!
//! - [`auth::SessionStore`]: the observable (identity, profile, loading) state
//! - [`backend::AuthBackend`]: the service contract, with an in-memory implementation
//! - [`api::ApiClient`]: the HTTP implementation of the contract
//! - [`nav::Navigator`]: the two-route navigation shell
//! - [`config::Config`]: connection settings

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod models;
pub mod nav;

pub use api::ApiClient;
pub use auth::{AuthError, AuthListener, SessionStore, SessionVault};
pub use backend::{AuthBackend, BackendError, InMemoryBackend};
pub use config::Config;
pub use models::{Identity, Profile, SessionState};
pub use nav::{Navigator, Route};
