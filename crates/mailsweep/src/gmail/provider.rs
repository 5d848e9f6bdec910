//! Provider seam the sync and unsubscribe pipelines talk through
//!
//! The trait-based design allows swapping the real Gmail client for a
//! test double, mirroring the storage abstraction.

use super::api::{GmailMessage, HistoryResponse, ListMessagesResponse, TokenResponse, WatchResponse};
use super::labels;
use crate::error::ProviderError;
use crate::models::MailAccount;

/// Stateless facade over the remote mail provider's REST surface.
///
/// Every method takes the account for the bearer credential. Non-2xx
/// responses are classified into [`ProviderError`], never panics.
pub trait MailProvider: Send + Sync {
    /// List INBOX message ids, up to `max` per page
    fn list_inbox_message_ids(
        &self,
        account: &MailAccount,
        max: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, ProviderError>;

    /// Get full message details by provider id
    fn get_message(&self, account: &MailAccount, id: &str) -> Result<GmailMessage, ProviderError>;

    /// List history since a given cursor.
    ///
    /// A provider-side "cursor too old" rejection yields an
    /// empty-but-successful [`HistoryResponse`], not an error.
    fn list_history(
        &self,
        account: &MailAccount,
        start_history_id: &str,
    ) -> Result<HistoryResponse, ProviderError>;

    /// Add and remove labels on a message
    fn modify_labels(
        &self,
        account: &MailAccount,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError>;

    /// Archive a message (remove it from INBOX)
    fn archive(&self, account: &MailAccount, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(account, id, &[], &[labels::INBOX])
    }

    /// Move a message to trash
    fn trash(&self, account: &MailAccount, id: &str) -> Result<(), ProviderError>;

    /// Register push notifications to a topic
    fn watch(&self, account: &MailAccount, topic: &str) -> Result<WatchResponse, ProviderError>;

    /// Unregister push notifications
    fn stop_watch(&self, account: &MailAccount) -> Result<(), ProviderError>;

    /// Mint a new access token from the stored refresh credential
    fn refresh_token(&self, account: &MailAccount) -> Result<TokenResponse, ProviderError>;

    /// Revoke the stored credential upstream (disconnect)
    fn revoke_token(&self, account: &MailAccount) -> Result<(), ProviderError>;
}
