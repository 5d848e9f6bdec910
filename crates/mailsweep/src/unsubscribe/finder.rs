//! Unsubscribe link discovery
//!
//! Deterministic pattern matching first; the model is only consulted
//! when no pattern hits, and only with a bounded prefix of the body.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::ai::{strip_code_fence, CompletionClient};
use crate::config::UnsubscribeConfig;
use crate::error::{AiError, FailureCause};
use crate::models::UnsubscribeMethod;

/// URL patterns that identify an unsubscribe mechanism, tried in order
static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)https?://[^\s"'<>]*unsubscribe[^\s"'<>]*"#,
        r#"(?i)https?://[^\s"'<>]*opt[-_]?out[^\s"'<>]*"#,
        r#"(?i)https?://[^\s"'<>]*remove[^\s"'<>]*"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// How sure discovery is about a found link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Deterministic pattern match
    High,
    /// Model extraction
    Low,
}

/// A discovered unsubscribe mechanism
#[derive(Debug, Clone, PartialEq)]
pub struct FoundLink {
    pub url: String,
    pub method: UnsubscribeMethod,
    pub confidence: Confidence,
}

/// Strict-JSON reply shape requested from the model
#[derive(Debug, Deserialize)]
struct FinderReply {
    found: bool,
    method: Option<String>,
    url: Option<String>,
    #[allow(dead_code)]
    instructions: Option<String>,
}

const FINDER_PROMPT: &str = "Find how to unsubscribe from the following email. \
Reply with strict JSON only, no prose, of the shape \
{\"found\": bool, \"method\": \"link\"|\"form\"|\"manual\", \"url\": string|null, \
\"instructions\": string|null}.\n\nEmail body:\n";

/// Locate the unsubscribe mechanism in a message body.
///
/// `Ok(None)` means no mechanism exists (terminal `not_found`). An
/// unconfigured model degrades to pattern matching only. Model
/// failures keep their kind: a malformed reply, an unreachable
/// service, and a rejected call are three different causes.
pub fn find_unsubscribe_link(
    body: &str,
    ai: &dyn CompletionClient,
    config: &UnsubscribeConfig,
) -> Result<Option<FoundLink>, FailureCause> {
    for pattern in LINK_PATTERNS.iter() {
        if let Some(m) = pattern.find(body) {
            debug!("Unsubscribe link found by pattern: {}", m.as_str());
            return Ok(Some(FoundLink {
                url: m.as_str().to_string(),
                method: UnsubscribeMethod::Link,
                confidence: Confidence::High,
            }));
        }
    }

    let prefix: String = body.chars().take(config.body_prefix_chars).collect();
    let prompt = format!("{}{}", FINDER_PROMPT, prefix);

    let reply = match ai.complete(&prompt, 256, 0.0) {
        Ok(reply) => reply,
        Err(AiError::Unconfigured) => return Ok(None),
        Err(AiError::Transport(detail)) => return Err(FailureCause::Network(detail)),
        Err(AiError::Api { status, .. }) => {
            return Err(FailureCause::ModelCallFailed(format!("HTTP {}", status)))
        }
        Err(AiError::Parse(detail)) => return Err(FailureCause::ModelCallFailed(detail)),
    };

    let parsed: FinderReply = serde_json::from_str(strip_code_fence(&reply))
        .map_err(|_| FailureCause::PageFormatNotUnderstood)?;

    if !parsed.found {
        return Ok(None);
    }
    let Some(url) = parsed.url else {
        // found=true with no URL is not a usable answer
        return Err(FailureCause::PageFormatNotUnderstood);
    };

    let method = parsed
        .method
        .as_deref()
        .and_then(UnsubscribeMethod::parse)
        .unwrap_or(UnsubscribeMethod::Link);

    Ok(Some(FoundLink {
        url,
        method,
        confidence: Confidence::Low,
    }))
}
