//! Core types for conversations, messages and streamed payloads

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a backend role string, ignoring roles the client never displays
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A conversation as listed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

/// A message as returned by the history endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// A message in the local conversation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server identifier, absent until the message is finalized
    pub id: Option<i64>,
    pub role: Role,
    pub content: String,
    /// Reasoning trace streamed before the answer
    pub thinking: Option<String>,
    /// Pricing result attached at finalization
    pub pricing: Option<PricingResult>,
    /// Inline form requested by the assistant
    pub form: Option<FormAttachment>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            thinking: None,
            pricing: None,
            form: None,
            created_at: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an empty assistant message to be filled by a stream
    pub fn placeholder() -> Self {
        Self::new(Role::Assistant, "")
    }

    /// Convert a stored message, skipping roles that are not displayed
    pub fn from_stored(stored: StoredMessage) -> Option<Self> {
        let role = Role::parse(&stored.role)?;
        Some(Self {
            id: Some(stored.id),
            role,
            content: stored.content,
            thinking: None,
            pricing: None,
            form: None,
            created_at: stored.created_at,
        })
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Text chunk carried by `thinking` and `content` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDelta {
    pub content: String,
}

/// Summary shown to the user when an action needs confirmation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDisplay {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// An out-of-band confirmation request raised mid-stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    pub action_type: String,
    #[serde(default)]
    pub display: ActionDisplay,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A pricing suggestion produced during the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub pricing_record_id: i64,
    pub property_id: i64,
    pub target_date: NaiveDate,
    pub conservative_price: f64,
    pub suggested_price: f64,
    pub aggressive_price: f64,
}

/// One input of an inline form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<serde_json::Value>>,
}

/// Inline form requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub form_type: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// A form attached to a message, with its submission state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormAttachment {
    pub descriptor: FormDescriptor,
    pub submitted: bool,
}

/// Authoritative message values sent when a stream finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalMessage {
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pending_actions: Vec<PendingAction>,
}

/// Result of confirming a pending action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmResult {
    pub success: bool,
    #[serde(rename = "type", default)]
    pub result_type: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// The request that opens a streamed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    /// Post a new user message
    Send { content: String },
    /// Replace a user message and regenerate from there
    Edit { message_id: i64, content: String },
    /// Regenerate an assistant reply
    Regenerate { message_id: i64 },
}

impl StreamRequest {
    /// Path suffix below `/chat/conversations/{id}/messages`
    pub fn endpoint(&self) -> &'static str {
        match self {
            StreamRequest::Send { .. } => "stream",
            StreamRequest::Edit { .. } => "edit",
            StreamRequest::Regenerate { .. } => "regenerate",
        }
    }

    /// JSON body for the request
    pub fn body(&self) -> serde_json::Value {
        match self {
            StreamRequest::Send { content } => serde_json::json!({ "content": content }),
            StreamRequest::Edit {
                message_id,
                content,
            } => serde_json::json!({ "message_id": message_id, "content": content }),
            StreamRequest::Regenerate { message_id } => {
                serde_json::json!({ "message_id": message_id })
            }
        }
    }
}

/// Backend timestamps come as RFC 3339 or as naive ISO-8601 values in UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_timestamp_naive_is_utc() {
        let dt = timestamp::parse("2025-03-01T08:30:15.123456").unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt.day(), 1);
    }

    #[test]
    fn test_timestamp_with_offset() {
        let dt = timestamp::parse("2025-03-01T08:30:15+08:00").unwrap();
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn test_timestamp_garbage() {
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_stored_message_skips_tool_role() {
        let stored: StoredMessage = serde_json::from_value(serde_json::json!({
            "id": 4, "role": "tool", "content": "{}", "created_at": "2025-01-01T00:00:00"
        }))
        .unwrap();
        assert!(ChatMessage::from_stored(stored).is_none());
    }

    #[test]
    fn test_stored_message_keeps_id() {
        let stored: StoredMessage = serde_json::from_value(serde_json::json!({
            "id": 7, "role": "assistant", "content": "hi", "created_at": "2025-01-01T00:00:00"
        }))
        .unwrap();
        let msg = ChatMessage::from_stored(stored).unwrap();
        assert_eq!(msg.id, Some(7));
        assert!(msg.is_assistant());
        assert_eq!(msg.created_at.year(), 2025);
    }

    #[test]
    fn test_final_message_tolerates_unknown_fields() {
        let done: FinalMessage = serde_json::from_value(serde_json::json!({
            "id": 12,
            "content": "final",
            "created_at": "2025-01-01T00:00:00",
            "usage": {"tokens": 5}
        }))
        .unwrap();
        assert_eq!(done.thinking, None);
        assert!(done.pending_actions.is_empty());
    }

    #[test]
    fn test_form_field_type_rename() {
        let field: FormField = serde_json::from_value(serde_json::json!({
            "key": "name", "label": "Name", "type": "text", "required": true
        }))
        .unwrap();
        assert_eq!(field.field_type, "text");
        assert!(field.placeholder.is_none());
    }

    #[test]
    fn test_stream_request_bodies() {
        let edit = StreamRequest::Edit {
            message_id: 3,
            content: "new".into(),
        };
        assert_eq!(edit.endpoint(), "edit");
        assert_eq!(
            edit.body(),
            serde_json::json!({"message_id": 3, "content": "new"})
        );
        let regen = StreamRequest::Regenerate { message_id: 9 };
        assert_eq!(regen.endpoint(), "regenerate");
        assert_eq!(regen.body(), serde_json::json!({"message_id": 9}));
    }
}
