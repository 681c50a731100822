//! Store event types

use stay_api::{ChatMessage, PendingAction};

use crate::session::SessionOutcome;

/// Events emitted as the store mutates the conversation
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A message was appended at `index`
    MessageAppended { index: usize, message: ChatMessage },

    /// Thinking text streamed into the message at `index`
    ThinkingDelta { index: usize, delta: String },

    /// Answer text streamed into the message at `index`
    ContentDelta { index: usize, delta: String },

    /// A form was attached to the message at `index`
    FormAttached { index: usize },

    /// The message at `index` received its authoritative values
    MessageFinalized { index: usize, message: ChatMessage },

    /// The message list was replaced or truncated
    MessagesReset { count: usize },

    /// The pending action was set or cleared
    PendingActionChanged { action: Option<PendingAction> },

    /// A streamed exchange started
    SessionStarted { conversation_id: String },

    /// A streamed exchange settled
    SessionEnded {
        conversation_id: String,
        outcome: SessionOutcome,
    },

    /// The conversation list changed
    ConversationsChanged,

    /// An error was recorded
    Error { message: String },
}
