//! Downstream message enrichment
//!
//! The processing job queued for every newly stored message: a short AI
//! summary and a category assignment ("pick one of N or none"). An
//! unconfigured model leaves both fields null and the job still
//! succeeds; enrichment is an upgrade, not a requirement.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use crate::ai::CompletionClient;
use crate::error::AiError;
use crate::models::{Category, Message};
use crate::storage::MailStore;

/// Body prefix handed to the model per enrichment call
const BODY_PREFIX_CHARS: usize = 2000;

pub struct Enricher {
    store: Arc<dyn MailStore>,
    ai: Arc<dyn CompletionClient>,
}

impl Enricher {
    pub fn new(store: Arc<dyn MailStore>, ai: Arc<dyn CompletionClient>) -> Self {
        Self { store, ai }
    }

    /// Enrich one stored message. Idempotent: re-running overwrites the
    /// summary and category with fresh values.
    pub fn process_message(&self, message_id: i64) -> Result<()> {
        let message = self
            .store
            .get_message(message_id)?
            .with_context(|| format!("No message with id {}", message_id))?;

        let summary = match self.summarize(&message) {
            Ok(summary) => Some(summary),
            Err(AiError::Unconfigured) => {
                debug!("AI unconfigured, skipping enrichment for message {}", message_id);
                return Ok(());
            }
            Err(e) => return Err(e).context("Summary generation failed"),
        };

        let categories = self.store.list_categories(message.owner_id)?;
        let category_id = if categories.is_empty() {
            None
        } else {
            match self.categorize(&message, &categories) {
                Ok(category_id) => category_id,
                Err(AiError::Unconfigured) => None,
                Err(e) => return Err(e).context("Category assignment failed"),
            }
        };

        self.store
            .update_message_enrichment(message_id, category_id, summary)?;
        Ok(())
    }

    fn body_prefix(message: &Message) -> String {
        message
            .body
            .as_deref()
            .unwrap_or(&message.preview)
            .chars()
            .take(BODY_PREFIX_CHARS)
            .collect()
    }

    fn summarize(&self, message: &Message) -> Result<String, AiError> {
        let prompt = format!(
            "Summarize this email in one short sentence. Reply with the sentence only.\n\n\
             Subject: {}\nFrom: {}\n\n{}",
            message.subject,
            message.from_email.as_deref().unwrap_or("unknown"),
            Self::body_prefix(message),
        );
        let summary = self.ai.complete(&prompt, 96, 0.3)?;
        Ok(summary.trim().to_string())
    }

    /// Ask the model to pick one of the owner's category names, or
    /// "none". Any reply that doesn't match a name case-insensitively
    /// means no category; guessing is worse than leaving it blank.
    fn categorize(
        &self,
        message: &Message,
        categories: &[Category],
    ) -> Result<Option<i64>, AiError> {
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Pick the single best category for this email from this list, or reply \
             \"none\" if nothing fits. Reply with the category name only.\n\
             Categories: {}\n\nSubject: {}\n\n{}",
            names.join(", "),
            message.subject,
            Self::body_prefix(message),
        );

        let reply = self.ai.complete(&prompt, 32, 0.0)?;
        let picked = reply.trim().trim_matches('"');

        Ok(categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(picked))
            .map(|c| c.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryMailStore;
    use crate::testing::FakeAi;

    fn store_with_message() -> (Arc<InMemoryMailStore>, i64) {
        let store = Arc::new(InMemoryMailStore::new());
        let message = store
            .insert_message(
                Message::builder(1, 1, "g1", "t1")
                    .subject("Your receipt")
                    .body(Some("Thanks for your purchase".to_string()))
                    .build(),
            )
            .unwrap()
            .unwrap();
        (store, message.id)
    }

    #[test]
    fn test_summary_and_category_stored() {
        let (store, message_id) = store_with_message();
        store
            .insert_category(Category::new(1, "Receipts"))
            .unwrap();
        store.insert_category(Category::new(1, "News")).unwrap();

        let ai = FakeAi::new();
        ai.push_reply("A purchase receipt.\n");
        ai.push_reply("receipts"); // case differs from the stored name

        let enricher = Enricher::new(store.clone(), Arc::new(ai));
        enricher.process_message(message_id).unwrap();

        let message = store.get_message(message_id).unwrap().unwrap();
        assert_eq!(message.summary.as_deref(), Some("A purchase receipt."));
        let receipts = store.list_categories(1).unwrap()[0].clone();
        assert_eq!(message.category_id, Some(receipts.id));
    }

    #[test]
    fn test_unmatched_category_reply_means_none() {
        let (store, message_id) = store_with_message();
        store.insert_category(Category::new(1, "News")).unwrap();

        let ai = FakeAi::new();
        ai.push_reply("A purchase receipt.");
        ai.push_reply("Shopping"); // not one of the owner's categories

        let enricher = Enricher::new(store.clone(), Arc::new(ai));
        enricher.process_message(message_id).unwrap();

        let message = store.get_message(message_id).unwrap().unwrap();
        assert_eq!(message.category_id, None);
        assert!(message.summary.is_some());
    }

    #[test]
    fn test_unconfigured_model_leaves_nulls_and_succeeds() {
        let (store, message_id) = store_with_message();
        let enricher = Enricher::new(store.clone(), Arc::new(FakeAi::unconfigured()));
        enricher.process_message(message_id).unwrap();

        let message = store.get_message(message_id).unwrap().unwrap();
        assert_eq!(message.summary, None);
        assert_eq!(message.category_id, None);
    }

    #[test]
    fn test_model_failure_propagates_for_retry() {
        let (store, message_id) = store_with_message();
        let ai = FakeAi::new();
        ai.push_error(AiError::Transport("timeout".to_string()));

        let enricher = Enricher::new(store, Arc::new(ai));
        assert!(enricher.process_message(message_id).is_err());
    }
}
