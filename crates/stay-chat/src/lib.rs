//! stay-chat: Streaming sessions and conversation state
//!
//! This crate owns the conversation model shown to the user and drives
//! streamed exchanges against a [`stay_api::ChatTransport`], one
//! cancellable session per conversation.

pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use handle::{ChatHandle, SessionHandle, SessionRegistry, SessionState};
pub use session::{SessionHandler, SessionOutcome, StreamingSession};
pub use store::{Acknowledgements, ChatConfig, ChatStore};
