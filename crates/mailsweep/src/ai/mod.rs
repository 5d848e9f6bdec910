//! AI completion collaborator
//!
//! A single trait seam over the completion API so the sync and
//! unsubscribe pipelines can be tested without a network. The real
//! client speaks the OpenAI chat-completions protocol over synchronous
//! HTTP, same as the provider client.

use std::time::Duration;

use serde::Deserialize;
use ureq::Agent;

use crate::config::AiCredentials;
use crate::error::AiError;

/// Prompt-in, text-out completion service
pub trait CompletionClient: Send + Sync {
    /// Run a single-turn completion. Implementations return
    /// [`AiError::Unconfigured`] when no credentials are available so
    /// callers can degrade instead of failing the surrounding job.
    fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, AiError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Chat-completions client. Construct with `None` credentials for an
/// always-unconfigured client.
pub struct OpenAiClient {
    agent: Agent,
    credentials: Option<AiCredentials>,
}

impl OpenAiClient {
    /// Per-request timeout for completion calls. Longer than the provider
    /// timeout: model latency dominates.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(credentials: Option<AiCredentials>) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .new_agent();

        Self { agent, credentials }
    }
}

impl CompletionClient for OpenAiClient {
    fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, AiError> {
        let creds = self.credentials.as_ref().ok_or(AiError::Unconfigured)?;

        let url = format!("{}/chat/completions", creds.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": creds.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", creds.api_key))
            .send_json(&body)
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let parsed: ChatResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| AiError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::Parse("reply contained no choices".to_string()))
    }
}

/// Strip a markdown code fence from a model reply, if present.
///
/// Models often wrap requested JSON in ```json fences despite
/// instructions not to; callers strip before parsing.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .map(str::trim_end)
        .unwrap_or(trimmed)
}
