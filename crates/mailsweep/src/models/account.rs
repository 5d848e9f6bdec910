//! Account model representing a connected mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected mailbox with its provider credentials and sync cursor.
///
/// `(owner_id, provider_uid)` and `(owner_id, email)` are each unique in
/// storage. Credential fields are mutated by the token guard on refresh;
/// `last_history_id` is advanced (monotonically) by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailAccount {
    /// Unique integer identifier (database primary key)
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// Provider identity id (Gmail profile id)
    pub provider_uid: String,
    /// Email address
    pub email: String,
    /// Bearer credential for provider calls
    pub access_token: String,
    /// Long-lived credential used to mint new access tokens
    pub refresh_token: String,
    /// When the access token expires. None means never-expiring or not
    /// yet known; treated as valid.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// OAuth scopes granted at connect time
    pub scopes: Vec<String>,
    /// Last-processed history cursor. None until the first push
    /// notification adopts a baseline.
    pub last_history_id: Option<String>,
}

impl MailAccount {
    /// Create a new account (id will be assigned by the database)
    pub fn new(
        owner_id: i64,
        provider_uid: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            owner_id,
            provider_uid: provider_uid.into(),
            email: email.into(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_expires_at: None,
            scopes: Vec::new(),
            last_history_id: None,
        }
    }

    pub fn with_tokens(
        mut self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_token = access_token.into();
        self.refresh_token = refresh_token.into();
        self.token_expires_at = expires_at;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_history_id(mut self, history_id: impl Into<String>) -> Self {
        self.last_history_id = Some(history_id.into());
        self
    }

    /// Whether the access token has expired at `now`.
    ///
    /// A missing expiry is treated as valid.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    /// Whether this account has adopted a history baseline yet
    pub fn is_tracking(&self) -> bool {
        self.last_history_id.is_some()
    }

    /// The stored cursor as a number, for monotonic comparison.
    /// Gmail history ids are decimal integers.
    pub fn history_cursor(&self) -> Option<u64> {
        self.last_history_id.as_deref().and_then(|s| s.parse().ok())
    }
}
