//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Category, MailAccount, Message, UnsubscribeAttempt};

/// Trait for mail storage operations
///
/// Every operation is a single-record write; no operation requires a
/// cross-record transaction. The two invariants the store enforces:
/// `(account_id, gmail_id)` uniqueness (duplicate inserts are swallowed
/// no-ops) and monotone history-cursor advancement.
pub trait MailStore: Send + Sync {
    // === Accounts ===

    /// Insert an account, returning it with its assigned id
    fn insert_account(&self, account: MailAccount) -> Result<MailAccount>;

    /// Get an account by id
    fn get_account(&self, id: i64) -> Result<Option<MailAccount>>;

    /// Get an account by email address (push notifications identify
    /// accounts this way)
    fn get_account_by_email(&self, email: &str) -> Result<Option<MailAccount>>;

    /// Persist refreshed credential fields
    fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Advance the history cursor, but only forward: the update is a
    /// no-op when the stored cursor is numerically greater or equal.
    /// Returns whether the cursor moved.
    fn advance_history_cursor(&self, id: i64, history_id: &str) -> Result<bool>;

    /// Delete an account and (cascading) its messages
    fn delete_account(&self, id: i64) -> Result<()>;

    // === Messages ===

    /// Insert a message. Returns the stored message with its assigned
    /// id, or None when `(account_id, gmail_id)` already exists — the
    /// duplicate is swallowed, never an error.
    fn insert_message(&self, message: Message) -> Result<Option<Message>>;

    /// Check whether a provider message id is already stored
    fn has_message(&self, account_id: i64, gmail_id: &str) -> Result<bool>;

    /// Get a message by id
    fn get_message(&self, id: i64) -> Result<Option<Message>>;

    /// List an account's messages, newest first; messages with no
    /// received instant sort last
    fn list_messages_for_account(&self, account_id: i64) -> Result<Vec<Message>>;

    /// Record that the provider-side archive succeeded
    fn set_message_archived(&self, id: i64, archived_at: DateTime<Utc>) -> Result<()>;

    /// Store downstream-processing results (category and/or summary)
    fn update_message_enrichment(
        &self,
        id: i64,
        category_id: Option<i64>,
        summary: Option<String>,
    ) -> Result<()>;

    /// Overwrite the whole unsubscribe attempt tuple atomically
    fn set_unsubscribe_attempt(&self, id: i64, attempt: &UnsubscribeAttempt) -> Result<()>;

    /// Delete a message locally (provider-side trash is the caller's
    /// best-effort concern)
    fn delete_message(&self, id: i64) -> Result<()>;

    // === Categories ===

    /// Insert a category, returning it with its assigned id
    fn insert_category(&self, category: Category) -> Result<Category>;

    /// List an owner's categories
    fn list_categories(&self, owner_id: i64) -> Result<Vec<Category>>;
}
