//! Sync progress notifications
//!
//! Fire-and-forget events emitted around fetch bursts so a UI can show
//! activity. Delivery failures are the implementation's problem; the
//! sync pipeline never blocks on or fails because of a notification.

use serde::Serialize;

/// Event emitted while a sync burst runs
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// New mail was detected and fetching has begun
    Fetching { account_id: i64 },
    /// The burst finished; `stored` counts newly persisted messages
    FetchComplete { account_id: i64, stored: usize },
}

impl SyncEvent {
    /// Per-owner topic the event is published on
    pub fn topic(owner_id: i64) -> String {
        format!("mail.sync.{}", owner_id)
    }
}

/// Outbound notification channel
pub trait Notifier: Send + Sync {
    /// Publish an event. Best-effort: implementations log failures and
    /// return, they do not propagate them.
    fn notify(&self, topic: &str, event: &SyncEvent);
}

/// Notifier that drops every event
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _topic: &str, _event: &SyncEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = SyncEvent::FetchComplete {
            account_id: 3,
            stored: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fetch_complete");
        assert_eq!(json["stored"], 2);
        assert_eq!(SyncEvent::topic(7), "mail.sync.7");
    }
}
