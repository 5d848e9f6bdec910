//! Message model representing one normalized mailbox item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnsubscribeAttempt;

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "Jane Doe")
    pub name: Option<String>,
    /// Email address (e.g., "jane@x.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an address from a header fragment like `"Jane Doe" <jane@x.com>`.
    ///
    /// The name is the text before `<`, trimmed of surrounding quotes; the
    /// address is the text inside `<...>`. With no angle brackets the whole
    /// string is the address and the name is absent.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<') {
            if let Some(angle_end) = s.rfind('>') {
                if angle_start < angle_end {
                    let name = s[..angle_start].trim().trim_matches('"').trim();
                    let email = s[angle_start + 1..angle_end].trim();
                    return Self {
                        name: if name.is_empty() {
                            None
                        } else {
                            Some(name.to_string())
                        },
                        email: email.to_string(),
                    };
                }
            }
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Format the address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// One normalized mailbox item, owned by a [`super::MailAccount`].
///
/// `(account_id, gmail_id)` is unique in storage: re-delivery of the same
/// provider id is a swallowed no-op insert, the sole de-duplication
/// guarantee in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique integer identifier (database primary key)
    pub id: i64,
    pub account_id: i64,
    pub owner_id: i64,
    /// Provider message id
    pub gmail_id: String,
    /// Provider thread id
    pub thread_id: String,
    pub subject: String,
    /// Decoded body; None when no part decoded cleanly
    pub body: Option<String>,
    /// Short preview for list rendering
    pub preview: String,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub label_ids: Vec<String>,
    /// Assigned by downstream processing; None until classified
    pub category_id: Option<i64>,
    /// AI summary; None until enriched (or when AI is unconfigured)
    pub summary: Option<String>,
    /// When the message was received. None when neither the provider
    /// timestamp nor the Date header parsed; such messages sort last.
    pub received_at: Option<DateTime<Utc>>,
    /// Set after the provider-side archive call succeeds
    pub archived_at: Option<DateTime<Utc>>,
    /// Provider's internal timestamp, milliseconds since epoch.
    /// Monotonic ordering key within an account.
    pub internal_date: i64,
    pub unsubscribe: UnsubscribeAttempt,
}

impl Message {
    /// Create a new message builder
    pub fn builder(
        account_id: i64,
        owner_id: i64,
        gmail_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> MessageBuilder {
        MessageBuilder::new(account_id, owner_id, gmail_id.into(), thread_id.into())
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    account_id: i64,
    owner_id: i64,
    gmail_id: String,
    thread_id: String,
    subject: String,
    body: Option<String>,
    preview: String,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    label_ids: Vec<String>,
    received_at: Option<DateTime<Utc>>,
    internal_date: i64,
}

impl MessageBuilder {
    fn new(account_id: i64, owner_id: i64, gmail_id: String, thread_id: String) -> Self {
        Self {
            account_id,
            owner_id,
            gmail_id,
            thread_id,
            subject: String::new(),
            body: None,
            preview: String::new(),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            label_ids: Vec::new(),
            received_at: None,
            internal_date: 0,
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = preview.into();
        self
    }

    pub fn from(mut self, from: Option<EmailAddress>) -> Self {
        self.from = from;
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn received_at(mut self, received_at: Option<DateTime<Utc>>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn build(self) -> Message {
        let (from_name, from_email) = match self.from {
            Some(addr) => (addr.name, Some(addr.email)),
            None => (None, None),
        };
        Message {
            id: 0,
            account_id: self.account_id,
            owner_id: self.owner_id,
            gmail_id: self.gmail_id,
            thread_id: self.thread_id,
            subject: self.subject,
            body: self.body,
            preview: self.preview,
            from_name,
            from_email,
            to: self.to,
            cc: self.cc,
            label_ids: self.label_ids,
            category_id: None,
            summary: None,
            received_at: self.received_at,
            archived_at: None,
            internal_date: self.internal_date,
            unsubscribe: UnsubscribeAttempt::default(),
        }
    }
}
