//! Push notification intake
//!
//! Decodes the pub/sub envelope delivered to the webhook and converts
//! it into a queued sync job. The intake always acknowledges decodable
//! notifications, even for unknown mailboxes: a non-ack would only make
//! the broker redeliver a notification we can never use.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::prelude::*;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::jobs::{Job, JobQueue};
use crate::storage::MailStore;

/// Decoded payload of a mailbox push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub email: String,
    pub history_id: String,
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    /// Base64-encoded JSON payload
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    email_address: String,
    history_id: HistoryId,
}

/// The provider serializes historyId as a JSON number in push payloads
/// but as a string elsewhere; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryId {
    Number(u64),
    Text(String),
}

impl HistoryId {
    fn into_string(self) -> String {
        match self {
            HistoryId::Number(n) => n.to_string(),
            HistoryId::Text(s) => s,
        }
    }
}

/// Decode the raw webhook body into a [`PushNotification`]
pub fn decode_envelope(body: &str) -> Result<PushNotification> {
    let envelope: PushEnvelope =
        serde_json::from_str(body).context("Push body is not a pub/sub envelope")?;

    let decoded = BASE64_STANDARD
        .decode(&envelope.message.data)
        .context("Push message data is not base64")?;

    let payload: PushPayload =
        serde_json::from_slice(&decoded).context("Push message data is not a mailbox payload")?;

    Ok(PushNotification {
        email: payload.email_address,
        history_id: payload.history_id.into_string(),
    })
}

/// How the webhook should answer the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeStatus {
    /// Acknowledge: decoded, whether or not work was queued
    Accepted,
    /// Reject: the body was not a decodable notification
    BadRequest,
}

/// Webhook-side handler turning push bodies into sync jobs
pub struct NotificationIntake {
    store: Arc<dyn MailStore>,
    queue: Arc<dyn JobQueue>,
}

impl NotificationIntake {
    pub fn new(store: Arc<dyn MailStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Handle one webhook delivery.
    ///
    /// Returns `BadRequest` only for undecodable bodies. Unknown
    /// mailboxes and queue failures still acknowledge; they are logged,
    /// not bounced back to the broker.
    pub fn handle_push(&self, body: &str) -> IntakeStatus {
        let notification = match decode_envelope(body) {
            Ok(n) => n,
            Err(e) => {
                warn!("Discarding undecodable push notification: {:#}", e);
                return IntakeStatus::BadRequest;
            }
        };

        let account = match self.store.get_account_by_email(&notification.email) {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!(
                    "Push notification for unconnected mailbox {}, ignoring",
                    notification.email
                );
                return IntakeStatus::Accepted;
            }
            Err(e) => {
                warn!("Account lookup failed for push notification: {:#}", e);
                return IntakeStatus::Accepted;
            }
        };

        info!(
            "Queueing history sync for account {} at cursor {}",
            account.id, notification.history_id
        );
        if let Err(e) = self.queue.enqueue(Job::SyncHistory {
            account_id: account.id,
            history_id: notification.history_id,
        }) {
            warn!("Failed to queue sync job for account {}: {:#}", account.id, e);
        }

        IntakeStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobQueue;
    use crate::models::MailAccount;
    use crate::storage::InMemoryMailStore;

    fn push_body(email: &str, history_id: &str) -> String {
        // historyId as a bare number, the shape the broker actually sends
        let payload = format!(r#"{{"emailAddress": "{}", "historyId": {}}}"#, email, history_id);
        let data = BASE64_STANDARD.encode(payload);
        format!(r#"{{"message": {{"data": "{}", "messageId": "m1"}}, "subscription": "s"}}"#, data)
    }

    #[test]
    fn test_decode_accepts_numeric_and_string_history_id() {
        let n = decode_envelope(&push_body("u@example.com", "42")).unwrap();
        assert_eq!(n.history_id, "42");
        assert_eq!(n.email, "u@example.com");

        let s = decode_envelope(&push_body("u@example.com", r#""42""#)).unwrap();
        assert_eq!(s.history_id, "42");
    }

    #[test]
    fn test_undecodable_body_is_bad_request() {
        let store = Arc::new(InMemoryMailStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let intake = NotificationIntake::new(store, queue.clone());

        assert_eq!(intake.handle_push("not json"), IntakeStatus::BadRequest);
        assert_eq!(
            intake.handle_push(r#"{"message": {"data": "!!!"}}"#),
            IntakeStatus::BadRequest
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_known_account_queues_sync_job() {
        let store = Arc::new(InMemoryMailStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let account = store
            .insert_account(MailAccount::new(1, "uid", "u@example.com"))
            .unwrap();
        let intake = NotificationIntake::new(store, queue.clone());

        let status = intake.handle_push(&push_body("u@example.com", "77"));
        assert_eq!(status, IntakeStatus::Accepted);

        let queued = queue.dequeue().unwrap();
        assert_eq!(
            queued.job,
            Job::SyncHistory {
                account_id: account.id,
                history_id: "77".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_account_still_acknowledges() {
        let store = Arc::new(InMemoryMailStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let intake = NotificationIntake::new(store, queue.clone());

        let status = intake.handle_push(&push_body("stranger@example.com", "77"));
        assert_eq!(status, IntakeStatus::Accepted);
        assert!(queue.is_empty());
    }
}
