use anyhow::{Context, Result};
use keyring::Entry;

use crate::models::AuthSession;

const SERVICE_NAME: &str = "postboard";

const SESSION_ACCOUNT: &str = "session";

/// Keeps the current session in the OS keychain between runs.
#[derive(Debug, Clone)]
pub struct SessionVault {
    service: String,
}

impl Default for SessionVault {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionVault {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a separate keychain service, e.g. one per backend project.
    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, SESSION_ACCOUNT).context("Failed to create keyring entry")
    }

    /// Store the session as JSON in the OS keychain
    pub fn store(&self, session: &AuthSession) -> Result<()> {
        let contents = serde_json::to_string(session).context("Failed to serialize session")?;
        self.entry()?
            .set_password(&contents)
            .context("Failed to store session in keychain")?;
        Ok(())
    }

    /// Load the stored session, if any
    pub fn load(&self) -> Result<Option<AuthSession>> {
        match self.entry()?.get_password() {
            Ok(contents) => {
                let session =
                    serde_json::from_str(&contents).context("Failed to parse stored session")?;
                Ok(Some(session))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    /// Delete the stored session. Missing entries are not an error.
    pub fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
