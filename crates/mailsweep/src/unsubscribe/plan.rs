//! Action-plan decoding
//!
//! The model is asked for strict JSON describing how to unsubscribe on
//! a fetched page. The shape is a closed tagged variant: anything else
//! is a decode error, never a silently-accepted partial structure.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::ai::strip_code_fence;

/// Decoded unsubscribe action plan
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPlan {
    /// Loading the page was itself the unsubscribe action; verify with
    /// an indicator scan of the already-fetched body
    Direct {
        #[serde(default)]
        success_indicators: Vec<String>,
    },
    /// A form must be submitted
    Form {
        form_data: FormData,
        #[serde(default)]
        success_indicators: Vec<String>,
        #[serde(default)]
        requires_email: bool,
    },
    /// The page needs human interaction (login, captcha, reply email)
    ConfirmationNeeded {
        #[serde(default)]
        instructions: Option<String>,
    },
}

/// Form description inside a `form` plan
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FormData {
    pub action_url: String,
    #[serde(default = "default_form_method")]
    pub method: String,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

fn default_form_method() -> String {
    "POST".to_string()
}

/// Decode a model reply into an [`ActionPlan`]
pub fn parse_plan(reply: &str) -> Result<ActionPlan> {
    serde_json::from_str(strip_code_fence(reply)).context("Reply is not a valid action plan")
}

/// Resolve a possibly-relative form action against the page it came
/// from (`/x` → scheme+host, `x` → sibling of the original path)
pub fn resolve_action_url(original: &str, action: &str) -> Result<String> {
    let base = Url::parse(original)
        .with_context(|| format!("Original URL is not absolute: {}", original))?;
    let resolved = base
        .join(action)
        .with_context(|| format!("Cannot resolve form action: {}", action))?;
    Ok(resolved.to_string())
}

/// Collapse a form field value to the single string a URL-encoded
/// submission needs. The model sometimes hallucinates multi-select
/// arrays for single-valued fields; only the first element is kept.
pub fn field_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .first()
            .map(field_value_to_string)
            .unwrap_or_default(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_plan() {
        let reply = r#"{"type":"form","form_data":{"action_url":"/u?id=1","method":"POST","fields":{"reason":["1","2"]}},"requires_email":true}"#;
        let plan = parse_plan(reply).unwrap();
        match plan {
            ActionPlan::Form {
                form_data,
                requires_email,
                ..
            } => {
                assert_eq!(form_data.action_url, "/u?id=1");
                assert_eq!(form_data.method, "POST");
                assert!(requires_email);
            }
            other => panic!("expected form plan, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_plan_rejects_unknown_type() {
        assert!(parse_plan(r#"{"type":"magic"}"#).is_err());
        assert!(parse_plan("I think you should click the link").is_err());
        assert!(parse_plan(r#"{"type":"form"}"#).is_err());
    }

    #[test]
    fn test_parse_plan_strips_code_fence() {
        let plan = parse_plan("```json\n{\"type\":\"direct\"}\n```").unwrap();
        assert_eq!(
            plan,
            ActionPlan::Direct {
                success_indicators: vec![]
            }
        );
    }

    #[test]
    fn test_resolve_action_url() {
        let original = "https://example.com/mail/optout";
        assert_eq!(
            resolve_action_url(original, "/u?id=1").unwrap(),
            "https://example.com/u?id=1"
        );
        assert_eq!(
            resolve_action_url(original, "confirm").unwrap(),
            "https://example.com/mail/confirm"
        );
        assert_eq!(
            resolve_action_url(original, "https://other.example.com/x").unwrap(),
            "https://other.example.com/x"
        );
        assert!(resolve_action_url("not a url", "/u").is_err());
    }

    #[test]
    fn test_array_field_values_collapse_to_first_element() {
        assert_eq!(
            field_value_to_string(&serde_json::json!(["1", "2"])),
            "1"
        );
        assert_eq!(field_value_to_string(&serde_json::json!("x")), "x");
        assert_eq!(field_value_to_string(&serde_json::json!(7)), "7");
        assert_eq!(field_value_to_string(&serde_json::json!(null)), "");
        assert_eq!(field_value_to_string(&serde_json::json!([])), "");
    }
}
