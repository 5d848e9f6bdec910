//! In-memory storage implementation
//!
//! Used for tests and as a stub where no durable store is wired up.
//! HashMaps protected by RwLocks for thread-safe access.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::MailStore;
use crate::models::{Category, MailAccount, Message, UnsubscribeAttempt};

#[derive(Default)]
pub struct InMemoryMailStore {
    accounts: RwLock<HashMap<i64, MailAccount>>,
    messages: RwLock<HashMap<i64, Message>>,
    categories: RwLock<HashMap<i64, Category>>,
    next_id: RwLock<i64>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        let mut next = self.next_id.write().unwrap();
        *next += 1;
        *next
    }
}

impl MailStore for InMemoryMailStore {
    fn insert_account(&self, mut account: MailAccount) -> Result<MailAccount> {
        let mut accounts = self.accounts.write().unwrap();
        let duplicate = accounts.values().any(|a| {
            a.owner_id == account.owner_id
                && (a.provider_uid == account.provider_uid || a.email == account.email)
        });
        if duplicate {
            anyhow::bail!(
                "account already connected for owner {} ({})",
                account.owner_id,
                account.email
            );
        }
        account.id = self.allocate_id();
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn get_account(&self, id: i64) -> Result<Option<MailAccount>> {
        Ok(self.accounts.read().unwrap().get(&id).cloned())
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<MailAccount>> {
        Ok(self
            .accounts
            .read()
            .unwrap()
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    fn update_account_tokens(
        &self,
        id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        if let Some(account) = accounts.get_mut(&id) {
            account.access_token = access_token.to_string();
            account.token_expires_at = expires_at;
        }
        Ok(())
    }

    fn advance_history_cursor(&self, id: i64, history_id: &str) -> Result<bool> {
        let new_cursor: u64 = match history_id.parse() {
            Ok(v) => v,
            Err(_) => anyhow::bail!("non-numeric history cursor: {}", history_id),
        };

        let mut accounts = self.accounts.write().unwrap();
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };

        match account.history_cursor() {
            Some(current) if current >= new_cursor => Ok(false),
            _ => {
                account.last_history_id = Some(history_id.to_string());
                Ok(true)
            }
        }
    }

    fn delete_account(&self, id: i64) -> Result<()> {
        self.accounts.write().unwrap().remove(&id);
        self.messages
            .write()
            .unwrap()
            .retain(|_, m| m.account_id != id);
        Ok(())
    }

    fn insert_message(&self, mut message: Message) -> Result<Option<Message>> {
        let mut messages = self.messages.write().unwrap();
        let duplicate = messages
            .values()
            .any(|m| m.account_id == message.account_id && m.gmail_id == message.gmail_id);
        if duplicate {
            return Ok(None);
        }
        message.id = self.allocate_id();
        messages.insert(message.id, message.clone());
        Ok(Some(message))
    }

    fn has_message(&self, account_id: i64, gmail_id: &str) -> Result<bool> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .values()
            .any(|m| m.account_id == account_id && m.gmail_id == gmail_id))
    }

    fn get_message(&self, id: i64) -> Result<Option<Message>> {
        Ok(self.messages.read().unwrap().get(&id).cloned())
    }

    fn list_messages_for_account(&self, account_id: i64) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .unwrap()
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect();
        // Newest first, null received_at last
        messages.sort_by(|a, b| match (a.received_at, b.received_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(messages)
    }

    fn set_message_archived(&self, id: i64, archived_at: DateTime<Utc>) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(message) = messages.get_mut(&id) {
            message.archived_at = Some(archived_at);
        }
        Ok(())
    }

    fn update_message_enrichment(
        &self,
        id: i64,
        category_id: Option<i64>,
        summary: Option<String>,
    ) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(message) = messages.get_mut(&id) {
            if category_id.is_some() {
                message.category_id = category_id;
            }
            if summary.is_some() {
                message.summary = summary;
            }
        }
        Ok(())
    }

    fn set_unsubscribe_attempt(&self, id: i64, attempt: &UnsubscribeAttempt) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        if let Some(message) = messages.get_mut(&id) {
            message.unsubscribe = attempt.clone();
        }
        Ok(())
    }

    fn delete_message(&self, id: i64) -> Result<()> {
        self.messages.write().unwrap().remove(&id);
        Ok(())
    }

    fn insert_category(&self, mut category: Category) -> Result<Category> {
        category.id = self.allocate_id();
        self.categories
            .write()
            .unwrap()
            .insert(category.id, category.clone());
        Ok(category)
    }

    fn list_categories(&self, owner_id: i64) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self
            .categories
            .read()
            .unwrap()
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        categories.sort_by_key(|c| c.id);
        Ok(categories)
    }
}
