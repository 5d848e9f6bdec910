//! Test doubles
//!
//! Scriptable implementations of the provider, completion, and
//! notification seams. Public for the same reason [`InMemoryMailStore`]
//! is: integration tests and downstream consumers exercise the
//! pipelines without a network.
//!
//! [`InMemoryMailStore`]: crate::storage::InMemoryMailStore

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::ai::CompletionClient;
use crate::error::{AiError, ProviderError};
use crate::gmail::api::{
    GmailMessage, HistoryResponse, ListMessagesResponse, MessageRef, TokenResponse, WatchResponse,
};
use crate::gmail::MailProvider;
use crate::models::MailAccount;
use crate::notify::{Notifier, SyncEvent};

/// Scriptable [`MailProvider`]
#[derive(Default)]
pub struct FakeProvider {
    messages: Mutex<HashMap<String, GmailMessage>>,
    inbox_ids: Mutex<Vec<String>>,
    history: Mutex<Option<HistoryResponse>>,
    failing_message_ids: Mutex<Vec<String>>,
    refreshed: Mutex<Option<(String, u64)>>,
    refresh_fails: Mutex<bool>,
    refresh_calls: Mutex<usize>,
    watch_history_id: Mutex<String>,
    modify_calls: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
    stop_calls: Mutex<usize>,
    revoke_calls: Mutex<usize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            watch_history_id: Mutex::new("1".to_string()),
            ..Self::default()
        }
    }

    /// Script a message retrievable by id
    pub fn with_message(self, message: GmailMessage) -> Self {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
        self
    }

    /// Script the full-mailbox listing used by manual sync
    pub fn with_inbox_ids(self, ids: &[&str]) -> Self {
        *self.inbox_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Script the next history delta
    pub fn with_history(self, history: HistoryResponse) -> Self {
        *self.history.lock().unwrap() = Some(history);
        self
    }

    /// Make `get_message` answer HTTP 500 for one id
    pub fn with_message_failure(self, id: &str) -> Self {
        self.failing_message_ids.lock().unwrap().push(id.to_string());
        self
    }

    /// Script a successful token refresh
    pub fn with_refreshed_token(self, access_token: &str, expires_in: u64) -> Self {
        *self.refreshed.lock().unwrap() = Some((access_token.to_string(), expires_in));
        self
    }

    /// Make every token refresh fail
    pub fn with_refresh_failure(self) -> Self {
        *self.refresh_fails.lock().unwrap() = true;
        self
    }

    /// Script the baseline cursor returned by `watch`
    pub fn with_watch_history_id(self, history_id: &str) -> Self {
        *self.watch_history_id.lock().unwrap() = history_id.to_string();
        self
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }

    /// Ids whose labels were modified to remove INBOX
    pub fn archived_ids(&self) -> Vec<String> {
        self.modify_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, remove)| remove.iter().any(|l| l == crate::gmail::labels::INBOX))
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    pub fn stop_calls(&self) -> usize {
        *self.stop_calls.lock().unwrap()
    }

    pub fn revoke_calls(&self) -> usize {
        *self.revoke_calls.lock().unwrap()
    }
}

impl MailProvider for FakeProvider {
    fn list_inbox_message_ids(
        &self,
        _account: &MailAccount,
        max: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, ProviderError> {
        let ids = self.inbox_ids.lock().unwrap();
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let page: Vec<MessageRef> = ids
            .iter()
            .skip(offset)
            .take(max)
            .map(|id| MessageRef {
                id: id.clone(),
                thread_id: None,
            })
            .collect();
        let next = offset + page.len();
        Ok(ListMessagesResponse {
            messages: Some(page),
            next_page_token: (next < ids.len()).then(|| next.to_string()),
            result_size_estimate: Some(ids.len() as u32),
        })
    }

    fn get_message(
        &self,
        _account: &MailAccount,
        id: &str,
    ) -> Result<GmailMessage, ProviderError> {
        if self
            .failing_message_ids
            .lock()
            .unwrap()
            .iter()
            .any(|f| f == id)
        {
            return Err(ProviderError::Api {
                status: 500,
                body: "backend error".to_string(),
            });
        }

        self.messages
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ProviderError::Api {
                status: 404,
                body: "not found".to_string(),
            })
    }

    fn list_history(
        &self,
        _account: &MailAccount,
        _start_history_id: &str,
    ) -> Result<HistoryResponse, ProviderError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default())
    }

    fn modify_labels(
        &self,
        _account: &MailAccount,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError> {
        self.modify_calls.lock().unwrap().push((
            id.to_string(),
            add.iter().map(|s| s.to_string()).collect(),
            remove.iter().map(|s| s.to_string()).collect(),
        ));
        Ok(())
    }

    fn trash(&self, account: &MailAccount, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(account, id, &[crate::gmail::labels::TRASH], &[])
    }

    fn watch(
        &self,
        _account: &MailAccount,
        _topic: &str,
    ) -> Result<WatchResponse, ProviderError> {
        Ok(WatchResponse {
            history_id: Some(self.watch_history_id.lock().unwrap().clone()),
            expiration: Some("0".to_string()),
        })
    }

    fn stop_watch(&self, _account: &MailAccount) -> Result<(), ProviderError> {
        *self.stop_calls.lock().unwrap() += 1;
        Ok(())
    }

    fn refresh_token(&self, _account: &MailAccount) -> Result<TokenResponse, ProviderError> {
        *self.refresh_calls.lock().unwrap() += 1;
        if *self.refresh_fails.lock().unwrap() {
            return Err(ProviderError::Auth);
        }
        let (access_token, expires_in) = self
            .refreshed
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ("fake-token".to_string(), 3600));
        Ok(TokenResponse {
            access_token,
            refresh_token: None,
            expires_in: Some(expires_in),
            scope: None,
            token_type: None,
        })
    }

    fn revoke_token(&self, _account: &MailAccount) -> Result<(), ProviderError> {
        *self.revoke_calls.lock().unwrap() += 1;
        Ok(())
    }
}

/// Scriptable [`CompletionClient`] replaying queued replies
#[derive(Default)]
pub struct FakeAi {
    replies: Mutex<VecDeque<Result<String, AiError>>>,
    prompts: Mutex<Vec<String>>,
    unconfigured: bool,
}

impl FakeAi {
    /// A client with no scripted replies; queue them with
    /// [`push_reply`](Self::push_reply) / [`push_error`](Self::push_error)
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that always answers [`AiError::Unconfigured`]
    pub fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
    }

    pub fn push_error(&self, error: AiError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Prompts seen so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl CompletionClient for FakeAi {
    fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, AiError> {
        if self.unconfigured {
            return Err(AiError::Unconfigured);
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AiError::Parse("no scripted reply".to_string())))
    }
}

/// Notifier that records every event it is handed
#[derive(Default)]
pub struct CapturingNotifier {
    events: Mutex<Vec<(String, SyncEvent)>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, SyncEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for CapturingNotifier {
    fn notify(&self, topic: &str, event: &SyncEvent) {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
    }
}
