//! History-driven sync engine
//!
//! One engine instance serves every account; all per-account state lives
//! on the account record (credential fields and the history cursor).
//! Every provider call goes through the token guard so an expired
//! credential costs at most one refresh round-trip.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};

use crate::gmail::{parse_message, MailProvider, TokenGuard};
use crate::jobs::{Job, JobQueue};
use crate::models::MailAccount;
use crate::notify::{Notifier, SyncEvent};
use crate::storage::MailStore;

/// Messages fetched per chunk during a manual full sync
const SYNC_CHUNK: usize = 10;

/// Outcome counters for one sync burst
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// New message ids seen in the delta or listing
    pub discovered: usize,
    /// Messages newly persisted
    pub stored: usize,
    /// Ids skipped because they were already stored
    pub skipped: usize,
    /// Messages that failed to fetch or parse (logged, not fatal)
    pub failed: usize,
}

/// Drives cursor-based synchronization for connected accounts
pub struct SyncEngine {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn MailStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    guard: TokenGuard,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn MailStore>,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let guard = TokenGuard::new(provider.clone(), store.clone());
        Self {
            provider,
            store,
            queue,
            notifier,
            guard,
        }
    }

    /// React to a push notification for an account.
    ///
    /// An account with no cursor adopts the notified value as its
    /// baseline without fetching: history before the first notification
    /// is unknowable through the delta API, and `sync_now` exists for
    /// backfill. A tracking account resolves the delta from its stored
    /// cursor and advances it afterwards, even when the delta was empty.
    pub fn handle_notification(
        &self,
        account_id: i64,
        notified_history_id: &str,
    ) -> Result<SyncStats> {
        let account = self
            .store
            .get_account(account_id)?
            .with_context(|| format!("No account with id {}", account_id))?;

        let Some(cursor) = account.last_history_id.clone() else {
            info!(
                "Account {} adopting baseline cursor {}",
                account.id, notified_history_id
            );
            self.store
                .advance_history_cursor(account.id, notified_history_id)?;
            return Ok(SyncStats::default());
        };

        let history = self
            .guard
            .with_auth_retry(&account, |acct| self.provider.list_history(acct, &cursor))
            .context("History delta fetch failed")?;

        // Only messagesAdded entries that still carry INBOX matter;
        // the same message can appear in several history records.
        let mut seen = HashSet::new();
        let mut new_ids = Vec::new();
        for record in history.history.unwrap_or_default() {
            for added in record.messages_added.unwrap_or_default() {
                let msg = added.message;
                if !msg.has_label(crate::gmail::labels::INBOX) {
                    continue;
                }
                if seen.insert(msg.id.clone()) && !self.store.has_message(account.id, &msg.id)? {
                    new_ids.push(msg.id);
                }
            }
        }

        let mut stats = SyncStats {
            discovered: new_ids.len(),
            skipped: seen.len() - new_ids.len(),
            ..SyncStats::default()
        };

        if !new_ids.is_empty() {
            self.notifier.notify(
                &SyncEvent::topic(account.owner_id),
                &SyncEvent::Fetching {
                    account_id: account.id,
                },
            );
            self.ingest(&account, &new_ids, &mut stats);
            self.notifier.notify(
                &SyncEvent::topic(account.owner_id),
                &SyncEvent::FetchComplete {
                    account_id: account.id,
                    stored: stats.stored,
                },
            );
        }

        // The delta endpoint reports the mailbox's current cursor; fall
        // back to the notified value when it doesn't.
        let next_cursor = history
            .history_id
            .unwrap_or_else(|| notified_history_id.to_string());
        self.store.advance_history_cursor(account.id, &next_cursor)?;

        info!(
            "Account {} sync: {} discovered, {} stored, {} failed",
            account.id, stats.discovered, stats.stored, stats.failed
        );
        Ok(stats)
    }

    /// Sync the inbox by direct listing, ignoring the history cursor.
    ///
    /// Used for backfill after connecting an account and as a recovery
    /// path when the cursor has expired. Fetches at most `max` messages
    /// in chunks; the cursor is left untouched.
    pub fn sync_now(&self, account_id: i64, max: usize) -> Result<SyncStats> {
        let account = self
            .store
            .get_account(account_id)?
            .with_context(|| format!("No account with id {}", account_id))?;

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let remaining = max.saturating_sub(ids.len());
            if remaining == 0 {
                break;
            }
            let page = self.guard.with_auth_retry(&account, |acct| {
                self.provider
                    .list_inbox_message_ids(acct, remaining, page_token.as_deref())
            })?;

            ids.extend(page.messages.unwrap_or_default().into_iter().map(|m| m.id));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        let mut stats = SyncStats::default();
        let mut new_ids = Vec::new();
        for id in ids {
            if self.store.has_message(account.id, &id)? {
                stats.skipped += 1;
            } else {
                new_ids.push(id);
            }
        }
        stats.discovered = new_ids.len();

        if new_ids.is_empty() {
            return Ok(stats);
        }

        self.notifier.notify(
            &SyncEvent::topic(account.owner_id),
            &SyncEvent::Fetching {
                account_id: account.id,
            },
        );
        for chunk in new_ids.chunks(SYNC_CHUNK) {
            self.ingest(&account, chunk, &mut stats);
            debug!(
                "Account {} manual sync progress: {}/{}",
                account.id,
                stats.stored + stats.failed,
                stats.discovered
            );
        }
        self.notifier.notify(
            &SyncEvent::topic(account.owner_id),
            &SyncEvent::FetchComplete {
                account_id: account.id,
                stored: stats.stored,
            },
        );

        Ok(stats)
    }

    /// Register for push notifications on the account's mailbox.
    ///
    /// An uninitialized account adopts the baseline cursor the provider
    /// reports, so the first push finds it already tracking.
    pub fn register_watch(&self, account_id: i64, topic: &str) -> Result<()> {
        let account = self
            .store
            .get_account(account_id)?
            .with_context(|| format!("No account with id {}", account_id))?;

        let response = self
            .guard
            .with_auth_retry(&account, |acct| self.provider.watch(acct, topic))
            .context("Watch registration failed")?;

        if let Some(history_id) = response.history_id {
            self.store.advance_history_cursor(account.id, &history_id)?;
        }
        info!("Account {} watching topic {}", account.id, topic);
        Ok(())
    }

    /// Disconnect an account: stop notifications, revoke the credential,
    /// delete the local record and its messages.
    ///
    /// Provider-side cleanup is best-effort; a revoked-elsewhere or
    /// already-expired credential must not block local removal.
    pub fn disconnect(&self, account_id: i64) -> Result<()> {
        let account = self
            .store
            .get_account(account_id)?
            .with_context(|| format!("No account with id {}", account_id))?;

        if let Err(e) = self.provider.stop_watch(&account) {
            warn!("Failed to stop watch for account {}: {}", account.id, e);
        }
        if let Err(e) = self.provider.revoke_token(&account) {
            warn!("Failed to revoke credential for account {}: {}", account.id, e);
        }

        self.store.delete_account(account.id)?;
        info!("Account {} disconnected", account.id);
        Ok(())
    }

    /// Fetch, persist, queue, and archive a batch of message ids.
    ///
    /// Each message is independent: a fetch or parse failure is counted
    /// and logged, never propagated, so one broken message cannot stall
    /// the rest of the burst.
    fn ingest(&self, account: &MailAccount, ids: &[impl AsRef<str>], stats: &mut SyncStats) {
        for id in ids {
            let id = id.as_ref();
            let raw = match self
                .guard
                .with_auth_retry(account, |acct| self.provider.get_message(acct, id))
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Fetch failed for message {}: {}", id, e);
                    stats.failed += 1;
                    continue;
                }
            };

            let message = match parse_message(&raw, account.id, account.owner_id) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Parse failed for message {}: {:#}", id, e);
                    stats.failed += 1;
                    continue;
                }
            };

            let stored = match self.store.insert_message(message) {
                Ok(Some(stored)) => stored,
                Ok(None) => {
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Store failed for message {}: {:#}", id, e);
                    stats.failed += 1;
                    continue;
                }
            };
            stats.stored += 1;

            if let Err(e) = self.queue.enqueue(Job::ProcessMessage {
                message_id: stored.id,
            }) {
                warn!("Failed to queue processing for message {}: {:#}", stored.id, e);
            }

            // Archive only after the message is safely persisted; a
            // failure leaves it in the provider inbox for the next sync.
            match self
                .guard
                .with_auth_retry(account, |acct| self.provider.archive(acct, id))
            {
                Ok(()) => {
                    if let Err(e) = self.store.set_message_archived(stored.id, Utc::now()) {
                        warn!("Failed to record archive for message {}: {:#}", stored.id, e);
                    }
                }
                Err(e) => warn!("Archive failed for message {}: {}", id, e),
            }
        }
    }
}
