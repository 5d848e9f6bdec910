//! Unsubscribe attempt execution
//!
//! Drives one attempt end to end: discovery, page fetch, plan
//! extraction, plan execution, verification. Every network fault is
//! caught at the boundary and becomes a terminal attempt tuple; the
//! record is never left in `processing`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use ureq::Agent;
use url::Url;

use super::finder::{find_unsubscribe_link, FoundLink};
use super::plan::{field_value_to_string, parse_plan, resolve_action_url, ActionPlan};
use crate::ai::CompletionClient;
use crate::config::UnsubscribeConfig;
use crate::error::{AiError, FailureCause};
use crate::models::{Message, UnsubscribeAttempt, UnsubscribeMethod, UnsubscribeStatus};
use crate::storage::MailStore;

/// Transport-level failure from the unsubscribe web client
#[derive(Debug)]
pub enum WebError {
    /// The request completed with a non-2xx status
    Status(u16),
    /// The request never completed
    Transport(String),
}

/// HTTP seam for unsubscribe pages, separate from the provider client:
/// these are arbitrary third-party hosts with their own redirect and
/// timeout bounds.
pub trait WebClient: Send + Sync {
    /// Fetch a page, following a bounded number of redirects
    fn fetch(&self, url: &str) -> Result<String, WebError>;

    /// Submit a URL-encoded form and return the response body
    fn submit_form(
        &self,
        url: &str,
        method: &str,
        fields: &[(String, String)],
    ) -> Result<String, WebError>;
}

/// [`WebClient`] over ureq
pub struct UreqWebClient {
    agent: Agent,
}

impl UreqWebClient {
    pub fn new(config: &UnsubscribeConfig) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.request_timeout_secs)))
            .max_redirects(config.max_redirects)
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    fn read_checked(mut response: ureq::http::Response<ureq::Body>) -> Result<String, WebError> {
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string().unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(WebError::Status(status));
        }
        Ok(body)
    }
}

impl WebClient for UreqWebClient {
    fn fetch(&self, url: &str) -> Result<String, WebError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| WebError::Transport(e.to_string()))?;
        Self::read_checked(response)
    }

    fn submit_form(
        &self,
        url: &str,
        method: &str,
        fields: &[(String, String)],
    ) -> Result<String, WebError> {
        let response = if method.eq_ignore_ascii_case("get") {
            let mut target =
                Url::parse(url).map_err(|e| WebError::Transport(e.to_string()))?;
            target
                .query_pairs_mut()
                .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            self.agent
                .get(target.as_str())
                .call()
                .map_err(|e| WebError::Transport(e.to_string()))?
        } else {
            self.agent
                .post(url)
                .send_form(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .map_err(|e| WebError::Transport(e.to_string()))?
        };
        Self::read_checked(response)
    }
}

const PLAN_PROMPT: &str = "You are looking at an unsubscribe page. Decide what action \
completes the unsubscribe. Reply with strict JSON only, no prose, of the shape \
{\"type\": \"direct\"|\"form\"|\"confirmation_needed\", \
\"success_indicators\": [string], \
\"form_data\": {\"action_url\": string, \"method\": string, \"fields\": object} (form only), \
\"requires_email\": bool}.\n\nPage HTML:\n";

/// Runs unsubscribe attempts against stored messages
pub struct UnsubscribeExecutor {
    store: Arc<dyn MailStore>,
    ai: Arc<dyn CompletionClient>,
    web: Arc<dyn WebClient>,
    config: UnsubscribeConfig,
}

impl UnsubscribeExecutor {
    pub fn new(
        store: Arc<dyn MailStore>,
        ai: Arc<dyn CompletionClient>,
        config: UnsubscribeConfig,
    ) -> Self {
        let web = Arc::new(UreqWebClient::new(&config));
        Self::with_web_client(store, ai, web, config)
    }

    pub fn with_web_client(
        store: Arc<dyn MailStore>,
        ai: Arc<dyn CompletionClient>,
        web: Arc<dyn WebClient>,
        config: UnsubscribeConfig,
    ) -> Self {
        Self {
            store,
            ai,
            web,
            config,
        }
    }

    /// Run one attempt for a stored message. The terminal tuple is
    /// written wholesale; a retry re-runs the whole pipeline from link
    /// discovery.
    pub fn run(&self, message_id: i64) -> Result<UnsubscribeStatus> {
        let message = self
            .store
            .get_message(message_id)?
            .with_context(|| format!("No message with id {}", message_id))?;

        self.store
            .set_unsubscribe_attempt(message_id, &UnsubscribeAttempt::processing())?;

        let attempt = self.attempt(&message);
        self.store.set_unsubscribe_attempt(message_id, &attempt)?;

        info!(
            "Unsubscribe attempt for message {} ended {}",
            message_id,
            attempt.status.as_str()
        );
        Ok(attempt.status)
    }

    fn attempt(&self, message: &Message) -> UnsubscribeAttempt {
        let body = message.body.as_deref().unwrap_or(&message.preview);

        let found = match find_unsubscribe_link(body, self.ai.as_ref(), &self.config) {
            Ok(Some(found)) => found,
            Ok(None) => return UnsubscribeAttempt::not_found(),
            Err(cause) => return UnsubscribeAttempt::failed(None, None, &cause),
        };

        self.execute(message, &found)
    }

    fn execute(&self, message: &Message, found: &FoundLink) -> UnsubscribeAttempt {
        let link = found.url.clone();
        let fail =
            |cause: FailureCause| UnsubscribeAttempt::failed(Some(link.clone()), Some(found.method), &cause);

        let page = match self.web.fetch(&found.url) {
            Ok(page) => page,
            Err(WebError::Status(status)) => return fail(FailureCause::Http(status)),
            Err(WebError::Transport(detail)) => return fail(FailureCause::Network(detail)),
        };

        let prefix: String = page.chars().take(self.config.html_prefix_chars).collect();
        let reply = match self
            .ai
            .complete(&format!("{}{}", PLAN_PROMPT, prefix), 512, 0.0)
        {
            Ok(reply) => reply,
            // No model means no plan; hand the link to the user instead
            // of failing the attempt.
            Err(AiError::Unconfigured) => return UnsubscribeAttempt::pending_confirmation(link),
            Err(AiError::Transport(detail)) => return fail(FailureCause::Network(detail)),
            Err(AiError::Api { status, .. }) => {
                return fail(FailureCause::ModelCallFailed(format!("HTTP {}", status)))
            }
            Err(AiError::Parse(detail)) => return fail(FailureCause::ModelCallFailed(detail)),
        };

        let plan = match parse_plan(&reply) {
            Ok(plan) => plan,
            Err(_) => return fail(FailureCause::PageFormatNotUnderstood),
        };

        match plan {
            ActionPlan::ConfirmationNeeded { .. } => {
                UnsubscribeAttempt::pending_confirmation(link)
            }
            ActionPlan::Direct { success_indicators } => {
                if self.scan_for_success(&page, &success_indicators) {
                    UnsubscribeAttempt::success(link, UnsubscribeMethod::Link)
                } else {
                    fail(FailureCause::SuccessUnverified)
                }
            }
            ActionPlan::Form {
                form_data,
                success_indicators,
                requires_email,
            } => {
                let action = match resolve_action_url(&found.url, &form_data.action_url) {
                    Ok(action) => action,
                    Err(e) => {
                        return fail(FailureCause::FormSubmission(format!(
                            "unresolvable action URL: {:#}",
                            e
                        )))
                    }
                };

                let mut fields: Vec<(String, String)> = form_data
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), field_value_to_string(value)))
                    .collect();
                fields.sort();
                if requires_email {
                    fields.retain(|(name, _)| name != "email");
                    fields.push(("email".to_string(), self.account_email(message)));
                }

                let response = match self.web.submit_form(&action, &form_data.method, &fields) {
                    Ok(response) => response,
                    Err(WebError::Status(status)) => {
                        return fail(FailureCause::FormSubmission(format!("HTTP {}", status)))
                    }
                    Err(WebError::Transport(detail)) => {
                        return fail(FailureCause::FormSubmission(detail))
                    }
                };

                if self.scan_for_success(&response, &success_indicators) {
                    UnsubscribeAttempt::success(link, UnsubscribeMethod::Form)
                } else {
                    fail(FailureCause::SuccessUnverified)
                }
            }
        }
    }

    /// Case-insensitive indicator scan; the configured default set backs
    /// up a plan that supplied none
    fn scan_for_success(&self, body: &str, indicators: &[String]) -> bool {
        let indicators = if indicators.is_empty() {
            &self.config.success_indicators
        } else {
            indicators
        };
        let haystack = body.to_lowercase();
        indicators
            .iter()
            .any(|needle| haystack.contains(&needle.to_lowercase()))
    }

    fn account_email(&self, message: &Message) -> String {
        match self.store.get_account(message.account_id) {
            Ok(Some(account)) => account.email,
            Ok(None) => {
                warn!("Message {} has no account, submitting without email", message.id);
                String::new()
            }
            Err(e) => {
                warn!("Account lookup failed for message {}: {:#}", message.id, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::models::MailAccount;
    use crate::storage::InMemoryMailStore;
    use crate::testing::FakeAi;

    #[derive(Default)]
    struct ScriptedWeb {
        pages: HashMap<String, Result<String, u16>>,
        submissions: Mutex<Vec<(String, String, Vec<(String, String)>)>>,
        form_response: Option<String>,
    }

    impl ScriptedWeb {
        fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), Ok(body.to_string()));
            self
        }

        fn with_page_status(mut self, url: &str, status: u16) -> Self {
            self.pages.insert(url.to_string(), Err(status));
            self
        }

        fn with_form_response(mut self, body: &str) -> Self {
            self.form_response = Some(body.to_string());
            self
        }
    }

    impl WebClient for ScriptedWeb {
        fn fetch(&self, url: &str) -> Result<String, WebError> {
            match self.pages.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(WebError::Status(*status)),
                None => Err(WebError::Transport("connection refused".to_string())),
            }
        }

        fn submit_form(
            &self,
            url: &str,
            method: &str,
            fields: &[(String, String)],
        ) -> Result<String, WebError> {
            self.submissions.lock().unwrap().push((
                url.to_string(),
                method.to_string(),
                fields.to_vec(),
            ));
            Ok(self.form_response.clone().unwrap_or_default())
        }
    }

    struct Fixture {
        store: Arc<InMemoryMailStore>,
        ai: Arc<FakeAi>,
        web: Arc<ScriptedWeb>,
        executor: UnsubscribeExecutor,
        message_id: i64,
    }

    fn fixture(body: &str, ai: FakeAi, web: ScriptedWeb) -> Fixture {
        let store = Arc::new(InMemoryMailStore::new());
        let account = store
            .insert_account(MailAccount::new(1, "uid", "user@example.com"))
            .unwrap();
        let message = store
            .insert_message(
                Message::builder(account.id, 1, "g1", "t1")
                    .subject("Weekly deals")
                    .body(Some(body.to_string()))
                    .build(),
            )
            .unwrap()
            .unwrap();

        let ai = Arc::new(ai);
        let web = Arc::new(web);
        let executor = UnsubscribeExecutor::with_web_client(
            store.clone(),
            ai.clone(),
            web.clone(),
            UnsubscribeConfig::default(),
        );
        Fixture {
            store,
            ai,
            web,
            executor,
            message_id: message.id,
        }
    }

    fn stored_attempt(f: &Fixture) -> UnsubscribeAttempt {
        f.store
            .get_message(f.message_id)
            .unwrap()
            .unwrap()
            .unsubscribe
    }

    const LINK_BODY: &str = "Bye: https://list.example.com/unsubscribe?id=99";
    const LINK_URL: &str = "https://list.example.com/unsubscribe?id=99";

    #[test]
    fn test_http_500_fetch_fails_with_status_cause() {
        let f = fixture(
            LINK_BODY,
            FakeAi::new(),
            ScriptedWeb::default().with_page_status(LINK_URL, 500),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::Failed);

        let attempt = stored_attempt(&f);
        assert_eq!(attempt.error.as_deref(), Some("HTTP error 500"));
        assert_ne!(attempt.status, UnsubscribeStatus::Processing);
        assert_eq!(attempt.link.as_deref(), Some(LINK_URL));
    }

    #[test]
    fn test_transport_failure_records_network_cause() {
        let f = fixture(LINK_BODY, FakeAi::new(), ScriptedWeb::default());
        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::Failed);
        assert!(stored_attempt(&f)
            .error
            .unwrap()
            .starts_with("network failure"));
    }

    #[test]
    fn test_no_mechanism_anywhere_is_not_found() {
        let ai = FakeAi::new();
        ai.push_reply(r#"{"found": false, "method": null, "url": null, "instructions": null}"#);
        let f = fixture("just a newsletter", ai, ScriptedWeb::default());

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::NotFound);
    }

    #[test]
    fn test_direct_plan_verifies_against_fetched_page() {
        let ai = FakeAi::new();
        ai.push_reply(r#"{"type": "direct", "success_indicators": ["you are out"]}"#);
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default().with_page(LINK_URL, "<h1>You are out of the list</h1>"),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::Success);

        let attempt = stored_attempt(&f);
        assert_eq!(attempt.method, Some(UnsubscribeMethod::Link));
        assert!(attempt.completed_at.is_some());
    }

    #[test]
    fn test_direct_plan_without_match_is_unverified() {
        let ai = FakeAi::new();
        ai.push_reply(r#"{"type": "direct", "success_indicators": ["you are out"]}"#);
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default().with_page(LINK_URL, "<h1>Please confirm</h1>"),
        );

        f.executor.run(f.message_id).unwrap();
        assert_eq!(
            stored_attempt(&f).error.as_deref(),
            Some("completed but success unverified")
        );
    }

    #[test]
    fn test_form_plan_resolves_collapses_and_injects_email() {
        let ai = FakeAi::new();
        ai.push_reply(
            r#"{"type":"form","form_data":{"action_url":"/u?id=1","method":"POST","fields":{"reason":["1","2"]}},"requires_email":true}"#,
        );
        let f = fixture(
            "Bye: https://example.com/mail/optout",
            ai,
            ScriptedWeb::default()
                .with_page("https://example.com/mail/optout", "<form>...</form>")
                .with_form_response("You have been unsubscribed."),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::Success);
        assert_eq!(stored_attempt(&f).method, Some(UnsubscribeMethod::Form));

        let submissions = f.web.submissions.lock().unwrap();
        let (url, method, fields) = &submissions[0];
        assert_eq!(url, "https://example.com/u?id=1");
        assert_eq!(method, "POST");
        assert!(fields.contains(&("reason".to_string(), "1".to_string())));
        assert!(fields.contains(&("email".to_string(), "user@example.com".to_string())));
    }

    #[test]
    fn test_form_plan_without_indicators_uses_default_set() {
        let ai = FakeAi::new();
        ai.push_reply(
            r#"{"type":"form","form_data":{"action_url":"https://x.test/go","method":"POST","fields":{}}}"#,
        );
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default()
                .with_page(LINK_URL, "<form>")
                .with_form_response("Successfully removed from list"),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::Success);
    }

    #[test]
    fn test_confirmation_needed_stores_link_for_user() {
        let ai = FakeAi::new();
        ai.push_reply(r#"{"type": "confirmation_needed", "instructions": "log in first"}"#);
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default().with_page(LINK_URL, "<form>login</form>"),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::PendingConfirmation);
        assert_eq!(stored_attempt(&f).link.as_deref(), Some(LINK_URL));
    }

    #[test]
    fn test_unconfigured_model_at_plan_step_degrades_to_confirmation() {
        let f = fixture(
            LINK_BODY,
            FakeAi::unconfigured(),
            ScriptedWeb::default().with_page(LINK_URL, "<form>"),
        );

        let status = f.executor.run(f.message_id).unwrap();
        assert_eq!(status, UnsubscribeStatus::PendingConfirmation);
        assert_eq!(stored_attempt(&f).link.as_deref(), Some(LINK_URL));
    }

    #[test]
    fn test_malformed_plan_fails_with_page_format_cause() {
        let ai = FakeAi::new();
        ai.push_reply("just click the big red button");
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default().with_page(LINK_URL, "<form>"),
        );

        f.executor.run(f.message_id).unwrap();
        assert_eq!(
            stored_attempt(&f).error.as_deref(),
            Some("page format not understood")
        );
    }

    #[test]
    fn test_prompts_are_bounded_prefixes() {
        let ai = FakeAi::new();
        ai.push_reply(r#"{"type": "direct", "success_indicators": ["unsubscribed"]}"#);
        let huge_page = "unsubscribed ".repeat(2000);
        let f = fixture(
            LINK_BODY,
            ai,
            ScriptedWeb::default().with_page(LINK_URL, &huge_page),
        );

        f.executor.run(f.message_id).unwrap();
        let prompts = f.ai.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].len() < PLAN_PROMPT.len() + 3100);
    }
}
