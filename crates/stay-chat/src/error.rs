//! Error types for stay-chat

use thiserror::Error;

/// Result type alias using stay-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the transport layer
    #[error(transparent)]
    Api(#[from] stay_api::Error),

    /// A streamed exchange is already running for this conversation
    #[error("A reply is already streaming for conversation {conversation_id}")]
    SessionActive { conversation_id: String },
}

impl Error {
    /// Whether this is a rejected concurrent start
    pub fn is_session_active(&self) -> bool {
        matches!(self, Error::SessionActive { .. })
    }
}
