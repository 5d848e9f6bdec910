//! Access-token lifecycle management
//!
//! Guarantees a valid provider credential before any provider call,
//! refreshing and persisting on expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::warn;

use super::provider::MailProvider;
use crate::error::ProviderError;
use crate::models::MailAccount;
use crate::storage::MailStore;

/// Subtracted from the provider-reported lifetime so a token is never
/// used in its last seconds of life (absorbs clock skew and latency).
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 300;

/// Ensures a valid access credential before provider calls.
///
/// Mutates only the credential/expiry fields of accounts it is handed;
/// it never owns the account record and performs no provider calls
/// other than the refresh.
pub struct TokenGuard {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn MailStore>,
}

impl TokenGuard {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn MailStore>) -> Self {
        Self { provider, store }
    }

    /// Return an account whose access token is valid if possible.
    ///
    /// A missing expiry is treated as valid. On refresh failure the
    /// account is returned unchanged; the caller will hit an auth error
    /// downstream and handle it there.
    pub fn ensure_valid(&self, account: &MailAccount) -> MailAccount {
        if !account.token_expired(Utc::now()) {
            return account.clone();
        }

        match self.refresh(account) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(
                    "Token refresh failed for account {}: {}",
                    account.id, e
                );
                account.clone()
            }
        }
    }

    /// Run a provider operation with exactly one refresh-and-retry on an
    /// auth rejection; a second rejection is final.
    pub fn with_auth_retry<T>(
        &self,
        account: &MailAccount,
        op: impl Fn(&MailAccount) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let account = self.ensure_valid(account);
        match op(&account) {
            Err(e) if e.is_auth() => {
                let refreshed = self.refresh(&account)?;
                op(&refreshed)
            }
            other => other,
        }
    }

    /// Mint a new access token and persist it on the account record
    fn refresh(&self, account: &MailAccount) -> Result<MailAccount, ProviderError> {
        let token = self.provider.refresh_token(account)?;

        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64 - REFRESH_SAFETY_MARGIN_SECS));

        let mut updated = account.clone();
        updated.access_token = token.access_token;
        updated.token_expires_at = expires_at;

        if let Err(e) =
            self.store
                .update_account_tokens(account.id, &updated.access_token, expires_at)
        {
            // The in-memory token is still usable for this call chain.
            warn!("Failed to persist refreshed token for account {}: {}", account.id, e);
        }

        Ok(updated)
    }
}
