//! Error taxonomy for provider, AI, and unsubscribe failures
//!
//! Non-2xx responses are classified, not raised: callers match on the kind
//! to decide between refresh-and-retry, skip, and hard failure.

use std::fmt;

use thiserror::Error;

/// Classified failure from a mail provider call
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, DNS, or timeout failure before a response arrived
    #[error("network failure: {0}")]
    Transport(String),

    /// The provider rejected the call with a non-2xx status
    #[error("provider rejected the call: HTTP {status}")]
    Api { status: u16, body: String },

    /// Expired or invalid credential (refined from HTTP 401)
    #[error("credential rejected by provider")]
    Auth,

    /// The response arrived but could not be decoded
    #[error("malformed provider payload: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Classify a non-2xx status, refining 401 into `Auth`
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 401 {
            Self::Auth
        } else {
            Self::Api { status, body }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }
}

/// Classified failure from the AI completion service
#[derive(Debug, Error)]
pub enum AiError {
    /// No API key configured. Callers degrade the enrichment silently,
    /// never fail the surrounding job.
    #[error("AI credentials not configured")]
    Unconfigured,

    /// The AI service rejected the call with a non-2xx status
    #[error("AI service rejected the call: HTTP {status}")]
    Api { status: u16, body: String },

    /// Network, DNS, or timeout failure
    #[error("network failure: {0}")]
    Transport(String),

    /// The reply arrived but its JSON envelope could not be decoded
    #[error("malformed AI reply: {0}")]
    Parse(String),
}

/// Human-readable cause recorded on a terminal `failed` unsubscribe attempt.
///
/// These are deliberately not collapsed into one generic error: the
/// remediation differs (retry vs. manual action vs. report a bug).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The AI reply was not the strict JSON shape we asked for
    PageFormatNotUnderstood,
    /// The AI call itself failed (rejected or unreachable)
    ModelCallFailed(String),
    /// The unsubscribe page answered with a non-2xx status
    Http(u16),
    /// The unsubscribe page was unreachable
    Network(String),
    /// The form submission step failed
    FormSubmission(String),
    /// Everything executed but no success indicator matched
    SuccessUnverified,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageFormatNotUnderstood => write!(f, "page format not understood"),
            Self::ModelCallFailed(detail) => write!(f, "model call failed: {}", detail),
            Self::Http(status) => write!(f, "HTTP error {}", status),
            Self::Network(detail) => write!(f, "network failure: {}", detail),
            Self::FormSubmission(detail) => write!(f, "form submission failed: {}", detail),
            Self::SuccessUnverified => write!(f, "completed but success unverified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_refines_to_auth() {
        let err = ProviderError::from_status(401, "unauthorized".to_string());
        assert!(err.is_auth());
    }

    #[test]
    fn test_other_statuses_stay_api_errors() {
        let err = ProviderError::from_status(429, "rate limited".to_string());
        match err {
            ProviderError::Api { status, .. } => assert_eq!(status, 429),
            other => panic!("expected Api, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_causes_are_distinct_strings() {
        let causes = [
            FailureCause::PageFormatNotUnderstood.to_string(),
            FailureCause::ModelCallFailed("timeout".to_string()).to_string(),
            FailureCause::Http(500).to_string(),
            FailureCause::Network("dns".to_string()).to_string(),
            FailureCause::FormSubmission("refused".to_string()).to_string(),
            FailureCause::SuccessUnverified.to_string(),
        ];
        for (i, a) in causes.iter().enumerate() {
            for (j, b) in causes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
        assert_eq!(causes[2], "HTTP error 500");
    }
}
