//! Mailsweep - Incremental mailbox sync and unsubscribe automation
//!
//! This crate provides platform-independent mail plumbing:
//! - Domain models (MailAccount, Message, EmailAddress, UnsubscribeAttempt)
//! - Gmail API client, token lifecycle, and payload normalization
//! - Storage trait abstractions (sqlite and in-memory)
//! - Push-notification intake and the cursor-driven sync engine
//! - AI-guided unsubscribe discovery and execution
//! - Job queue contract tying the pipeline stages together
//!
//! This crate has zero UI dependencies; services embed it behind their
//! own transport.

pub mod ai;
pub mod config;
pub mod enrich;
pub mod error;
pub mod gmail;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod sync;
pub mod testing;
pub mod unsubscribe;

pub use ai::{CompletionClient, OpenAiClient};
pub use config::{AiCredentials, GoogleCredentials, UnsubscribeConfig};
pub use enrich::Enricher;
pub use error::{AiError, FailureCause, ProviderError};
pub use gmail::{GmailClient, MailProvider, TokenGuard, parse_message};
pub use jobs::{InMemoryJobQueue, Job, JobHandler, JobId, JobQueue, JobRunner};
pub use models::{
    Category, EmailAddress, MailAccount, Message, UnsubscribeAttempt, UnsubscribeMethod,
    UnsubscribeStatus,
};
pub use notify::{Notifier, NullNotifier, SyncEvent};
pub use pipeline::Pipeline;
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{IntakeStatus, NotificationIntake, SyncEngine, SyncStats};
pub use unsubscribe::{ActionPlan, UnsubscribeExecutor, find_unsubscribe_link};
