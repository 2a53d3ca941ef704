//! Account identity used across billing, trials, and provisioning.

use serde::{Deserialize, Serialize};

/// Information about an account that can hold a trial, a subscription, and a
/// tool workspace.
///
/// Implement this for your user type; [`AccountRef`] is a ready-made concrete
/// carrier for handlers and tests.
pub trait AccountIdentity: Send + Sync {
    /// Stable unique ID of the account.
    fn account_id(&self) -> &str;

    /// Email address. Trials are granted once per email, so this is the
    /// identity the anti-abuse rule keys on.
    fn email(&self) -> &str;

    /// Display name, if known.
    fn display_name(&self) -> Option<&str> {
        None
    }
}

/// A plain account reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AccountRef {
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl AccountIdentity for AccountRef {
    fn account_id(&self) -> &str {
        &self.id
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
