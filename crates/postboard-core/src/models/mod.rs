//! Data models for the session layer.
//!
//! This module contains the records shared by the backend contract and
//! the session store:
//!
//! - `Identity`, `AuthSession`: principal and token bundle issued by the auth service
//! - `Profile`, `ProfileRow`: application-owned profile record and its stored shape
//! - `SessionState`: the (identity, profile, loading) tuple consumers observe

pub mod identity;
pub mod profile;
pub mod state;

pub use identity::{AuthSession, Credentials, Identity};
pub use profile::{default_username, Profile, ProfileRow, FALLBACK_USERNAME};
pub use state::SessionState;
