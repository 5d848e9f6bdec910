//! Runtime configuration
//!
//! Credentials are read from JSON files in the shared config directory
//! (~/.config/mailsweep/), falling back to environment variables so the
//! services can run in containers without a config volume.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// OAuth client credentials for the Gmail API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// The JSON file downloaded from the Google Cloud console wraps the
/// credentials under an `installed` or `web` key depending on the
/// client type.
#[derive(Debug, Deserialize)]
struct GoogleCredentialsFile {
    installed: Option<GoogleCredentials>,
    web: Option<GoogleCredentials>,
}

impl GoogleCredentials {
    pub const FILENAME: &'static str = "google-credentials.json";

    /// Load credentials from the config directory, falling back to the
    /// GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET environment variables.
    pub fn load() -> Result<Self> {
        if config::config_exists(Self::FILENAME) {
            let file: GoogleCredentialsFile = config::load_json(Self::FILENAME)?;
            return file
                .installed
                .or(file.web)
                .context("google-credentials.json has neither 'installed' nor 'web' section");
        }

        let client_id = std::env::var("GMAIL_CLIENT_ID");
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET");
        match (client_id, client_secret) {
            (Ok(client_id), Ok(client_secret)) => Ok(Self {
                client_id,
                client_secret,
            }),
            _ => anyhow::bail!(
                "No Google credentials: place {} in the config directory or set \
                 GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                Self::FILENAME
            ),
        }
    }
}

/// Credentials and model selection for the completion API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCredentials {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl AiCredentials {
    pub const FILENAME: &'static str = "ai-credentials.json";

    /// Load credentials from the config directory, falling back to the
    /// OPENAI_API_KEY environment variable. Returns None when neither is
    /// present: the AI collaborator is optional and callers degrade
    /// gracefully without it.
    pub fn load() -> Result<Option<Self>> {
        if config::config_exists(Self::FILENAME) {
            return Ok(Some(config::load_json(Self::FILENAME)?));
        }

        match std::env::var("OPENAI_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Ok(Some(Self {
                api_key,
                model: default_model(),
                base_url: default_base_url(),
            })),
            _ => Ok(None),
        }
    }
}

/// Tunables for the unsubscribe executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsubscribeConfig {
    /// Per-request timeout in seconds for fetching unsubscribe pages and
    /// submitting forms
    pub request_timeout_secs: u64,
    /// Redirect ceiling for unsubscribe page fetches
    pub max_redirects: u32,
    /// How much of a message body is handed to the model when scanning
    /// for an unsubscribe mechanism
    pub body_prefix_chars: usize,
    /// How much of a fetched page is handed to the model when planning
    /// the unsubscribe action
    pub html_prefix_chars: usize,
    /// Phrases that count as confirmation on a post-action page,
    /// matched case-insensitively
    pub success_indicators: Vec<String>,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_redirects: 5,
            body_prefix_chars: 2000,
            html_prefix_chars: 3000,
            success_indicators: vec![
                "unsubscribed".to_string(),
                "success".to_string(),
                "successfully".to_string(),
            ],
        }
    }
}

impl UnsubscribeConfig {
    pub const FILENAME: &'static str = "unsubscribe.json";

    /// Load overrides from the config directory, or the defaults when no
    /// file exists
    pub fn load() -> Result<Self> {
        if config::config_exists(Self::FILENAME) {
            config::load_json(Self::FILENAME)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_config_defaults() {
        let cfg = UnsubscribeConfig::default();
        assert_eq!(cfg.max_redirects, 5);
        assert!(cfg.success_indicators.contains(&"unsubscribed".to_string()));
    }

    #[test]
    fn test_ai_credentials_defaults_from_partial_json() {
        let creds: AiCredentials = serde_json::from_str(r#"{"api_key": "sk-test"}"#).unwrap();
        assert_eq!(creds.api_key, "sk-test");
        assert_eq!(creds.base_url, "https://api.openai.com/v1");
        assert!(!creds.model.is_empty());
    }

    #[test]
    fn test_google_credentials_file_shapes() {
        let installed: GoogleCredentialsFile = serde_json::from_str(
            r#"{"installed": {"client_id": "id", "client_secret": "secret"}}"#,
        )
        .unwrap();
        assert_eq!(installed.installed.unwrap().client_id, "id");

        let web: GoogleCredentialsFile =
            serde_json::from_str(r#"{"web": {"client_id": "id", "client_secret": "secret"}}"#)
                .unwrap();
        assert!(web.installed.is_none());
        assert_eq!(web.web.unwrap().client_secret, "secret");
    }
}
