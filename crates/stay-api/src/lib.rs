//! stay-api: wire layer for the stay chat backend
//!
//! This crate provides the conversation and message types, the incremental
//! decoder for the chat event stream, typed event dispatch, and the
//! transport used to reach the backend over HTTP.

pub mod client;
pub mod error;
pub mod events;
pub mod sse;
pub mod types;

pub use client::{ChatTransport, ClientConfig, HttpChatClient};
pub use error::{Error, Result};
pub use events::{ChatEvent, ChatEventHandler};
pub use sse::{ByteStream, Frame, FrameDecoder, FrameStream};
pub use types::*;
