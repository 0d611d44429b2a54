use thiserror::Error;

use crate::backend::BackendError;

/// Message returned when sign-up is attempted without a username.
pub const USERNAME_REQUIRED: &str = "Username is required";

#[derive(Error, Debug)]
pub enum AuthError {
    /// Rejected locally before any backend call.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AuthError {
    pub fn is_validation(&self) -> bool {
        matches!(self, AuthError::Validation(_))
    }

    /// Short message suitable for showing under a form.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(message) => message.clone(),
            AuthError::Backend(BackendError::Network(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Backend(BackendError::RateLimited) => {
                "Too many attempts. Please wait and try again.".to_string()
            }
            AuthError::Backend(e) => e.to_string(),
        }
    }
}
