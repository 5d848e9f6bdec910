//! Unsubscribe attempt state tracked on each message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureCause;

/// Terminal and in-flight states of an unsubscribe attempt.
///
/// `pending → processing → {success, failed, not_found, pending_confirmation}`.
/// A new attempt overwrites the whole attempt tuple atomically; partial
/// updates are never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeStatus {
    Pending,
    Processing,
    Success,
    Failed,
    NotFound,
    PendingConfirmation,
}

impl UnsubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
            Self::PendingConfirmation => "pending_confirmation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "not_found" => Some(Self::NotFound),
            "pending_confirmation" => Some(Self::PendingConfirmation),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::NotFound | Self::PendingConfirmation
        )
    }
}

/// How the unsubscribe mechanism is exercised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeMethod {
    /// Visiting the link is expected to complete the unsubscribe
    Link,
    /// A form on the page must be submitted
    Form,
    /// The user must finish the flow manually
    Manual,
}

impl UnsubscribeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Form => "form",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "link" => Some(Self::Link),
            "form" => Some(Self::Form),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// The full attempt tuple stored on a message. Always written wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeAttempt {
    pub link: Option<String>,
    pub method: Option<UnsubscribeMethod>,
    pub status: UnsubscribeStatus,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for UnsubscribeAttempt {
    fn default() -> Self {
        Self {
            link: None,
            method: None,
            status: UnsubscribeStatus::Pending,
            attempted_at: None,
            completed_at: None,
            error: None,
        }
    }
}

impl UnsubscribeAttempt {
    /// In-flight tuple written when an attempt starts
    pub fn processing() -> Self {
        Self {
            status: UnsubscribeStatus::Processing,
            attempted_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn success(link: impl Into<String>, method: UnsubscribeMethod) -> Self {
        Self {
            link: Some(link.into()),
            method: Some(method),
            status: UnsubscribeStatus::Success,
            attempted_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            error: None,
        }
    }

    pub fn failed(
        link: Option<String>,
        method: Option<UnsubscribeMethod>,
        cause: &FailureCause,
    ) -> Self {
        Self {
            link,
            method,
            status: UnsubscribeStatus::Failed,
            attempted_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            error: Some(cause.to_string()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: UnsubscribeStatus::NotFound,
            attempted_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Stores the link so the user can finish the flow manually
    pub fn pending_confirmation(link: impl Into<String>) -> Self {
        Self {
            link: Some(link.into()),
            method: Some(UnsubscribeMethod::Manual),
            status: UnsubscribeStatus::PendingConfirmation,
            attempted_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            UnsubscribeStatus::Pending,
            UnsubscribeStatus::Processing,
            UnsubscribeStatus::Success,
            UnsubscribeStatus::Failed,
            UnsubscribeStatus::NotFound,
            UnsubscribeStatus::PendingConfirmation,
        ] {
            assert_eq!(UnsubscribeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UnsubscribeStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!UnsubscribeStatus::Pending.is_terminal());
        assert!(!UnsubscribeStatus::Processing.is_terminal());
        assert!(UnsubscribeStatus::Success.is_terminal());
        assert!(UnsubscribeStatus::Failed.is_terminal());
        assert!(UnsubscribeStatus::NotFound.is_terminal());
        assert!(UnsubscribeStatus::PendingConfirmation.is_terminal());
    }

    #[test]
    fn test_failed_records_cause_string() {
        let attempt = UnsubscribeAttempt::failed(
            Some("https://x.test/u".to_string()),
            Some(UnsubscribeMethod::Link),
            &FailureCause::Http(500),
        );
        assert_eq!(attempt.status, UnsubscribeStatus::Failed);
        assert_eq!(attempt.error.as_deref(), Some("HTTP error 500"));
        assert!(attempt.completed_at.is_some());
    }

    #[test]
    fn test_pending_confirmation_keeps_link() {
        let attempt = UnsubscribeAttempt::pending_confirmation("https://x.test/confirm");
        assert_eq!(attempt.status, UnsubscribeStatus::PendingConfirmation);
        assert_eq!(attempt.link.as_deref(), Some("https://x.test/confirm"));
        assert_eq!(attempt.method, Some(UnsubscribeMethod::Manual));
    }
}
