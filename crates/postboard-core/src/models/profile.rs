//! Application-owned profile records.

use serde::{Deserialize, Serialize};

use super::Identity;

/// Username used when an identity has no usable email.
pub const FALLBACK_USERNAME: &str = "anonymous";

/// Profile as stored in the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ProfileRow {
    /// A row whose display name mirrors the username.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: id.into(),
            display_name: Some(username.clone()),
            username,
        }
    }
}

/// Profile as published to the application, with the identity's email attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    pub fn from_row(row: ProfileRow, email: Option<String>) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            email,
        }
    }

    /// The locally synthesized profile for an identity that has none.
    pub fn default_for(identity: &Identity) -> Self {
        let row = ProfileRow::new(identity.id.clone(), default_username(identity.email.as_deref()));
        Self::from_row(row, identity.email.clone())
    }

    /// Name to show in the UI, falling back to the username.
    pub fn display(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }

    pub fn to_row(&self) -> ProfileRow {
        ProfileRow {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Derive a username from the local part of an email address.
pub fn default_username(email: Option<&str>) -> String {
    email
        .and_then(|e| e.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .unwrap_or(FALLBACK_USERNAME)
        .to_string()
}
