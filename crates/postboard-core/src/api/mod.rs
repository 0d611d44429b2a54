//! REST client for the hosted auth and table service.
//!
//! This module provides the `ApiClient`, an `AuthBackend` that talks to the
//! service's auth endpoints (`/auth/v1`) and its table endpoints
//! (`/rest/v1`). The client holds the current session, refreshes it when it
//! is close to expiry, and optionally persists it through a `SessionVault`.

pub mod client;

pub use client::ApiClient;
