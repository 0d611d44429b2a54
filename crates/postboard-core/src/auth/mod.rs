//! Authentication module for session state and persistence.
//!
//! This module provides:
//! - `SessionStore`: the (identity, profile, loading) state kept in sync with the backend
//! - `AuthListener`: guard owning the store's auth-change subscription
//! - `SessionVault`: OS keychain persistence for the current session
//! - `AuthError`: errors returned by the store's sign-up/sign-in/sign-out actions

pub mod credentials;
pub mod error;
pub mod session;

pub use credentials::SessionVault;
pub use error::AuthError;
pub use session::{AuthListener, SessionStore};
