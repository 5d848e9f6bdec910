//! Integration tests for the mailsweep crate
//!
//! These tests drive the complete flow: webhook intake, queued sync,
//! message ingest, enrichment, and unsubscribe execution, all through
//! the public seams with no network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::prelude::*;
use mailsweep::gmail::api::{
    GmailMessage, Header, HistoryMessageRef, HistoryRecord, HistoryResponse, MessageAdded,
    MessagePayload,
};
use mailsweep::testing::{CapturingNotifier, FakeAi, FakeProvider};
use mailsweep::unsubscribe::{WebClient, WebError};
use mailsweep::{
    Category, Enricher, InMemoryJobQueue, InMemoryMailStore, Job, JobQueue, JobRunner,
    MailAccount, MailStore, NotificationIntake, Pipeline, SqliteMailStore, SyncEngine,
    UnsubscribeConfig, UnsubscribeExecutor, UnsubscribeStatus,
};
use tempfile::TempDir;

/// Helper to build a raw provider message with an unsubscribe link
fn raw_message(id: &str, body: &str) -> GmailMessage {
    GmailMessage {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        label_ids: Some(vec!["INBOX".to_string()]),
        snippet: String::new(),
        internal_date: "1700000000000".to_string(),
        payload: Some(MessagePayload {
            headers: Some(vec![
                Header {
                    name: "From".to_string(),
                    value: "\"Deals Weekly\" <deals@list.example.com>".to_string(),
                },
                Header {
                    name: "Subject".to_string(),
                    value: format!("Subject {}", id),
                },
            ]),
            body: Some(mailsweep::gmail::api::MessageBody {
                size: None,
                data: Some(BASE64_URL_SAFE_NO_PAD.encode(body)),
            }),
            parts: None,
            mime_type: Some("text/plain".to_string()),
        }),
    }
}

fn history_with_added(ids: &[&str], history_id: &str) -> HistoryResponse {
    HistoryResponse {
        history: Some(vec![HistoryRecord {
            id: Some("h1".to_string()),
            messages_added: Some(
                ids.iter()
                    .map(|id| MessageAdded {
                        message: HistoryMessageRef {
                            id: id.to_string(),
                            thread_id: None,
                            label_ids: Some(vec!["INBOX".to_string()]),
                        },
                    })
                    .collect(),
            ),
        }]),
        history_id: Some(history_id.to_string()),
        next_page_token: None,
    }
}

fn push_body(email: &str, history_id: u64) -> String {
    let payload = format!(
        r#"{{"emailAddress": "{}", "historyId": {}}}"#,
        email, history_id
    );
    format!(
        r#"{{"message": {{"data": "{}"}}}}"#,
        BASE64_STANDARD.encode(payload)
    )
}

/// Scripted web pages for the unsubscribe executor
#[derive(Default)]
struct ScriptedWeb {
    pages: HashMap<String, String>,
    form_response: String,
    submissions: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl WebClient for ScriptedWeb {
    fn fetch(&self, url: &str) -> Result<String, WebError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| WebError::Transport("connection refused".to_string()))
    }

    fn submit_form(
        &self,
        url: &str,
        _method: &str,
        fields: &[(String, String)],
    ) -> Result<String, WebError> {
        self.submissions
            .lock()
            .unwrap()
            .push((url.to_string(), fields.to_vec()));
        Ok(self.form_response.clone())
    }
}

struct World {
    store: Arc<InMemoryMailStore>,
    queue: Arc<InMemoryJobQueue>,
    notifier: Arc<CapturingNotifier>,
    intake: NotificationIntake,
    runner: JobRunner,
    web: Arc<ScriptedWeb>,
    ai: Arc<FakeAi>,
    account: MailAccount,
}

fn world(provider: FakeProvider, ai: FakeAi, web: ScriptedWeb) -> World {
    let store = Arc::new(InMemoryMailStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let notifier = Arc::new(CapturingNotifier::new());
    let provider = Arc::new(provider);
    let ai = Arc::new(ai);
    let web = Arc::new(web);

    let account = store
        .insert_account(
            MailAccount::new(1, "uid-1", "user@example.com").with_tokens("tok", "rt", None),
        )
        .unwrap();

    let engine = Arc::new(SyncEngine::new(
        provider,
        store.clone(),
        queue.clone(),
        notifier.clone(),
    ));
    let enricher = Arc::new(Enricher::new(store.clone(), ai.clone()));
    let executor = Arc::new(UnsubscribeExecutor::with_web_client(
        store.clone(),
        ai.clone(),
        web.clone(),
        UnsubscribeConfig::default(),
    ));

    let intake = NotificationIntake::new(store.clone(), queue.clone());
    let runner = JobRunner::new(queue.clone(), Arc::new(Pipeline::new(engine, enricher, executor)));

    World {
        store,
        queue,
        notifier,
        intake,
        runner,
        web,
        ai,
        account,
    }
}

#[test]
fn test_first_notification_adopts_baseline_without_fetching() {
    let w = world(FakeProvider::new(), FakeAi::unconfigured(), ScriptedWeb::default());

    let status = w.intake.handle_push(&push_body("user@example.com", 100));
    assert_eq!(status, mailsweep::IntakeStatus::Accepted);

    let stats = w.runner.run_to_completion();
    assert_eq!(stats.succeeded, 1);

    let account = w.store.get_account(w.account.id).unwrap().unwrap();
    assert_eq!(account.last_history_id.as_deref(), Some("100"));
    assert!(w.store.list_messages_for_account(w.account.id).unwrap().is_empty());
    assert!(w.notifier.events().is_empty());
}

#[test]
fn test_push_to_enriched_message_end_to_end() {
    let body = "Deals! Opt out: https://list.example.com/unsubscribe?id=7";
    let provider = FakeProvider::new()
        .with_message(raw_message("g1", body))
        .with_history(history_with_added(&["g1"], "210"));

    let ai = FakeAi::new();
    ai.push_reply("Weekly promotional deals.");
    ai.push_reply("Promotions");

    let w = world(provider, ai, ScriptedWeb::default());
    w.store
        .insert_category(Category::new(1, "Promotions"))
        .unwrap();
    w.store.advance_history_cursor(w.account.id, "200").unwrap();

    w.intake.handle_push(&push_body("user@example.com", 205));
    let stats = w.runner.run_to_completion();
    // One sync job plus one processing job
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.dropped, 0);

    let messages = w.store.list_messages_for_account(w.account.id).unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.from_name.as_deref(), Some("Deals Weekly"));
    assert_eq!(message.from_email.as_deref(), Some("deals@list.example.com"));
    assert_eq!(message.summary.as_deref(), Some("Weekly promotional deals."));
    assert!(message.category_id.is_some());
    assert!(message.archived_at.is_some());

    // Cursor landed on the delta's value
    let account = w.store.get_account(w.account.id).unwrap().unwrap();
    assert_eq!(account.last_history_id.as_deref(), Some("210"));

    // Fetching then fetch-complete on the owner's topic
    let events = w.notifier.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "mail.sync.1");
}

#[test]
fn test_duplicate_notification_is_harmless() {
    let body = "Opt out: https://list.example.com/unsubscribe?id=7";
    let provider = FakeProvider::new()
        .with_message(raw_message("g1", body))
        .with_history(history_with_added(&["g1"], "210"));

    let w = world(provider, FakeAi::unconfigured(), ScriptedWeb::default());
    w.store.advance_history_cursor(w.account.id, "200").unwrap();

    let push = push_body("user@example.com", 205);
    w.intake.handle_push(&push);
    w.intake.handle_push(&push);
    w.runner.run_to_completion();

    let messages = w.store.list_messages_for_account(w.account.id).unwrap();
    assert_eq!(messages.len(), 1);
}

#[test]
fn test_unsubscribe_job_runs_form_flow() {
    let body = "Opt out here: https://shop.example.com/mail/unsubscribe?u=9";
    let provider = FakeProvider::new()
        .with_message(raw_message("g1", body))
        .with_history(history_with_added(&["g1"], "210"));

    let ai = FakeAi::new();
    // Consumed by the processing job during the first drain (the owner
    // has no categories, so only a summary is asked for)
    ai.push_reply("Promotional mail from a shop.");

    let mut web = ScriptedWeb::default();
    web.pages.insert(
        "https://shop.example.com/mail/unsubscribe?u=9".to_string(),
        "<form action=/optout/confirm>".to_string(),
    );
    web.form_response = "Done. You are unsubscribed.".to_string();

    let w = world(provider, ai, web);
    w.store.advance_history_cursor(w.account.id, "200").unwrap();
    w.intake.handle_push(&push_body("user@example.com", 205));
    w.runner.run_to_completion();

    let message = &w.store.list_messages_for_account(w.account.id).unwrap()[0];
    w.ai.push_reply(
        r#"{"type":"form","form_data":{"action_url":"/optout/confirm","method":"POST","fields":{"u":["9","10"]}},"requires_email":true,"success_indicators":["you are unsubscribed"]}"#,
    );
    w.queue
        .enqueue(Job::Unsubscribe {
            message_id: message.id,
        })
        .unwrap();
    let stats = w.runner.run_to_completion();
    assert_eq!(stats.dropped, 0);

    let message = w.store.get_message(message.id).unwrap().unwrap();
    assert_eq!(message.unsubscribe.status, UnsubscribeStatus::Success);
    assert_eq!(
        message.unsubscribe.link.as_deref(),
        Some("https://shop.example.com/mail/unsubscribe?u=9")
    );

    // Action URL resolved against the page, array collapsed, email injected
    let submissions = w.web.submissions.lock().unwrap();
    let (url, fields) = &submissions[0];
    assert_eq!(url, "https://shop.example.com/optout/confirm");
    assert!(fields.contains(&("u".to_string(), "9".to_string())));
    assert!(fields.contains(&("email".to_string(), "user@example.com".to_string())));
}

#[test]
fn test_failed_unsubscribe_retries_then_terminates() {
    let body = "Opt out: https://dead.example.com/unsubscribe";
    let provider = FakeProvider::new()
        .with_message(raw_message("g1", body))
        .with_history(history_with_added(&["g1"], "210"));

    // No scripted page: every fetch is a transport failure
    let w = world(provider, FakeAi::unconfigured(), ScriptedWeb::default());
    w.store.advance_history_cursor(w.account.id, "200").unwrap();
    w.intake.handle_push(&push_body("user@example.com", 205));
    w.runner.run_to_completion();

    let message = &w.store.list_messages_for_account(w.account.id).unwrap()[0];
    w.queue
        .enqueue(Job::Unsubscribe {
            message_id: message.id,
        })
        .unwrap();
    w.runner.run_to_completion();

    // A terminal failed attempt completes the job; no retry churn
    let message = w.store.get_message(message.id).unwrap().unwrap();
    assert_eq!(message.unsubscribe.status, UnsubscribeStatus::Failed);
    assert!(message
        .unsubscribe
        .error
        .unwrap()
        .starts_with("network failure"));
    assert!(w.queue.is_empty());
}

#[test]
fn test_sqlite_store_backs_the_same_flow() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteMailStore::new(dir.path().join("mail.db")).unwrap());

    let account = store
        .insert_account(
            MailAccount::new(1, "uid-1", "user@example.com")
                .with_tokens("tok", "rt", None)
                .with_history_id("200"),
        )
        .unwrap();

    let provider = Arc::new(
        FakeProvider::new()
            .with_message(raw_message("g1", "Opt out: https://x.test/unsubscribe"))
            .with_history(history_with_added(&["g1"], "210")),
    );
    let queue = Arc::new(InMemoryJobQueue::new());
    let engine = SyncEngine::new(
        provider,
        store.clone(),
        queue.clone(),
        Arc::new(mailsweep::NullNotifier),
    );

    let stats = engine.handle_notification(account.id, "205").unwrap();
    assert_eq!(stats.stored, 1);

    // Redelivery: the duplicate is swallowed by the uniqueness constraint
    let stats = engine.handle_notification(account.id, "205").unwrap();
    assert_eq!(stats.stored, 0);

    let messages = store.list_messages_for_account(account.id).unwrap();
    assert_eq!(messages.len(), 1);
    let account = store.get_account(account.id).unwrap().unwrap();
    assert_eq!(account.last_history_id.as_deref(), Some("210"));
}
