//! Gmail payload normalization
//!
//! Converts a raw provider message into a domain [`Message`]. Pure: no
//! I/O, no clock reads beyond the payload itself.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{EmailAddress, Message};

/// Maximum preview length derived from the body when no snippet exists
const PREVIEW_LEN: usize = 200;

/// Normalize a raw Gmail message into a domain [`Message`].
///
/// Header extraction is case-sensitive exact-name lookup: the provider
/// normalizes header casing (`Subject`, `From`, `To`, `Cc`, `Date`), so
/// folding would only mask malformed payloads.
pub fn parse_message(raw: &GmailMessage, account_id: i64, owner_id: i64) -> Result<Message> {
    let payload = raw.payload.as_ref().context("Message has no payload")?;

    let from = header(payload, "From").map(|s| EmailAddress::parse(&s));
    let to = header(payload, "To").map(|s| parse_address_list(&s)).unwrap_or_default();
    let cc = header(payload, "Cc").map(|s| parse_address_list(&s)).unwrap_or_default();
    let subject = header(payload, "Subject").unwrap_or_default();

    let body = extract_body(payload);
    let received_at = extract_received_at(raw, payload);

    let preview = if !raw.snippet.is_empty() {
        decode_html_entities(&raw.snippet)
    } else {
        body.as_deref()
            .map(|b| b.chars().take(PREVIEW_LEN).collect())
            .unwrap_or_default()
    };

    let internal_date: i64 = raw.internal_date.parse().unwrap_or(0);

    Ok(Message::builder(account_id, owner_id, &raw.id, &raw.thread_id)
        .subject(subject)
        .body(body)
        .preview(preview)
        .from(from)
        .to(to)
        .cc(cc)
        .label_ids(raw.label_ids.clone().unwrap_or_default())
        .received_at(received_at)
        .internal_date(internal_date)
        .build())
}

/// Extract a header value by exact name
fn header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.clone())
}

/// Parse a comma-separated list of email addresses
fn parse_address_list(s: &str) -> Vec<EmailAddress> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(EmailAddress::parse)
        .collect()
}

/// Received-instant prefers the provider's internal timestamp over the
/// `Date` header: header dates are sender-controlled and inconsistently
/// formatted. Header parsing is only a fallback, and any parse failure
/// yields None (callers sort such messages last).
fn extract_received_at(raw: &GmailMessage, payload: &MessagePayload) -> Option<DateTime<Utc>> {
    if let Ok(millis) = raw.internal_date.parse::<i64>() {
        if millis > 0 {
            if let Some(at) = Utc.timestamp_millis_opt(millis).single() {
                return Some(at);
            }
        }
    }

    header(payload, "Date")
        .and_then(|s| DateTime::parse_from_rfc2822(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Body extraction preference: first text/plain part found by depth-first
/// walk of the nested multipart structure, then first text/html part by
/// the same walk, then a body payload directly on the top-level part.
fn extract_body(payload: &MessagePayload) -> Option<String> {
    if let Some(parts) = &payload.parts {
        if let Some(text) = find_part_body(parts, "text/plain") {
            return Some(text);
        }
        if let Some(html) = find_part_body(parts, "text/html") {
            return Some(html);
        }
    }

    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .and_then(decode_base64_body)
}

/// Depth-first search for the first part of the given mime type with a
/// decodable body
fn find_part_body(parts: &[MessagePart], mime_type: &str) -> Option<String> {
    for part in parts {
        if part
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with(mime_type))
        {
            if let Some(text) = part
                .body
                .as_ref()
                .and_then(|b| b.data.as_deref())
                .and_then(decode_base64_body)
            {
                return Some(text);
            }
        }

        if let Some(nested) = &part.parts {
            if let Some(text) = find_part_body(nested, mime_type) {
                return Some(text);
            }
        }
    }

    None
}

/// Decode base64-encoded body data.
///
/// Gmail uses URL-safe base64 but padding can vary, so several decoders
/// are tried. Decode failure yields None rather than an error.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            if let Ok(s) = String::from_utf8(decoded) {
                return Some(s);
            }
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
