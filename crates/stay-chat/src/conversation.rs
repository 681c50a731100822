//! Local conversation state: messages, pending action, held pricing.

use stay_api::{ChatMessage, PendingAction, PricingResult};

/// The conversation shown to the user.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Server identifier, `None` until the first message creates it
    pub id: Option<String>,
    pub title: Option<String>,
    /// Chronological, also the display order
    pub messages: Vec<ChatMessage>,
    /// Confirmation request awaiting a user decision
    pub pending_action: Option<PendingAction>,
    /// Pricing payload held until the reply is finalized
    pub pending_pricing: Option<PricingResult>,
    /// Set while thinking chunks arrive, cleared by the first content chunk
    pub is_thinking: bool,
    /// Last error
    pub error: Option<String>,
}

impl Conversation {
    /// A loaded conversation with its history
    pub fn loaded(id: impl Into<String>, title: Option<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            id: Some(id.into()),
            title,
            messages,
            ..Self::default()
        }
    }

    /// Drop state that never survives a conversation switch
    pub fn clear_transient(&mut self) {
        self.pending_action = None;
        self.pending_pricing = None;
        self.is_thinking = false;
    }

    /// Index of the message with this server id
    pub fn find_message(&self, message_id: i64) -> Option<usize> {
        self.messages.iter().position(|m| m.id == Some(message_id))
    }

    /// Drop the message at `index` and everything after it
    pub fn truncate_from(&mut self, index: usize) {
        self.messages.truncate(index);
    }

    /// Append a message, returning its index
    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }
}
