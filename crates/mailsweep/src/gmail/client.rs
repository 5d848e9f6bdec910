//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Every call
//! attaches the account's bearer credential and an accept header;
//! non-2xx responses are classified, not raised.

use std::time::Duration;

use serde::de::DeserializeOwned;
use ureq::Agent;

use super::api::{
    GmailMessage, HistoryResponse, ListMessagesResponse, TokenResponse, WatchResponse,
};
use super::provider::MailProvider;
use crate::config::GoogleCredentials;
use crate::error::ProviderError;
use crate::models::MailAccount;

/// Gmail API client
pub struct GmailClient {
    agent: Agent,
    credentials: GoogleCredentials,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";
    /// OAuth token endpoint
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    /// OAuth revocation endpoint
    const REVOKE_URL: &'static str = "https://oauth2.googleapis.com/revoke";

    /// Per-request timeout for provider calls
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new Gmail client
    pub fn new(credentials: GoogleCredentials) -> Self {
        // Status codes are inspected, not raised, so 4xx/5xx bodies stay
        // available for classification.
        let agent = Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .new_agent();

        Self { agent, credentials }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        account: &MailAccount,
        url: &str,
    ) -> Result<T, ProviderError> {
        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", account.access_token))
            .header("Accept", "application/json")
            .call()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    /// POST a JSON body, ignoring the response payload
    fn post_json(
        &self,
        account: &MailAccount,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let mut response = self
            .agent
            .post(url)
            .header("Authorization", &format!("Bearer {}", account.access_token))
            .header("Accept", "application/json")
            .send_json(body)
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        Ok(())
    }

    fn post_json_response<T: DeserializeOwned>(
        &self,
        account: &MailAccount,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let mut response = self
            .agent
            .post(url)
            .header("Authorization", &format!("Bearer {}", account.access_token))
            .header("Accept", "application/json")
            .send_json(body)
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

impl MailProvider for GmailClient {
    fn list_inbox_message_ids(
        &self,
        account: &MailAccount,
        max: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, ProviderError> {
        let mut url = format!(
            "{}/users/me/messages?labelIds=INBOX&maxResults={}",
            Self::BASE_URL,
            max.min(500)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        self.get_json(account, &url)
    }

    fn get_message(&self, account: &MailAccount, id: &str) -> Result<GmailMessage, ProviderError> {
        let url = format!("{}/users/me/messages/{}?format=full", Self::BASE_URL, id);
        self.get_json(account, &url)
    }

    fn list_history(
        &self,
        account: &MailAccount,
        start_history_id: &str,
    ) -> Result<HistoryResponse, ProviderError> {
        let url = format!(
            "{}/users/me/history?startHistoryId={}&historyTypes=messageAdded",
            Self::BASE_URL,
            urlencoding::encode(start_history_id)
        );

        match self.get_json(account, &url) {
            Ok(history) => Ok(history),
            // Gmail answers 404 when the cursor has expired; the delta is
            // simply gone, which callers treat as an empty result.
            Err(ProviderError::Api { status: 404, .. }) => Ok(HistoryResponse::default()),
            Err(e) => Err(e),
        }
    }

    fn modify_labels(
        &self,
        account: &MailAccount,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), ProviderError> {
        let url = format!("{}/users/me/messages/{}/modify", Self::BASE_URL, id);
        let body = serde_json::json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });
        self.post_json(account, &url, &body)
    }

    fn trash(&self, account: &MailAccount, id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/users/me/messages/{}/trash", Self::BASE_URL, id);
        self.post_json(account, &url, &serde_json::json!({}))
    }

    fn watch(&self, account: &MailAccount, topic: &str) -> Result<WatchResponse, ProviderError> {
        let url = format!("{}/users/me/watch", Self::BASE_URL);
        let body = serde_json::json!({
            "topicName": topic,
            "labelIds": [super::labels::INBOX],
        });
        self.post_json_response(account, &url, &body)
    }

    fn stop_watch(&self, account: &MailAccount) -> Result<(), ProviderError> {
        let url = format!("{}/users/me/stop", Self::BASE_URL);
        self.post_json(account, &url, &serde_json::json!({}))
    }

    fn refresh_token(&self, account: &MailAccount) -> Result<TokenResponse, ProviderError> {
        let mut response = self
            .agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", account.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    fn revoke_token(&self, account: &MailAccount) -> Result<(), ProviderError> {
        let mut response = self
            .agent
            .post(Self::REVOKE_URL)
            .send_form([("token", account.refresh_token.as_str())])
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        Ok(())
    }
}
