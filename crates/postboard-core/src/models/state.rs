use serde::Serialize;

use super::{Identity, Profile};

/// The tuple consumers observe. Replaced as a whole on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
        }
    }
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }
}
