//! Typed chat events and dispatch to handlers

use crate::sse::Frame;
use crate::types::{FinalMessage, FormDescriptor, PendingAction, PricingResult, TextDelta};

/// Events the backend emits on a chat stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Reasoning trace chunk
    Thinking(String),
    /// Answer text chunk
    Content(String),
    /// Confirmation request for an operation
    Action(PendingAction),
    /// Pricing suggestion to attach on finalization
    Pricing(PricingResult),
    /// Inline form to show under the reply
    Form(FormDescriptor),
    /// Authoritative final message
    Done(FinalMessage),
}

impl ChatEvent {
    /// Parse a decoded frame.
    ///
    /// Unknown event names and malformed payloads yield `None`; a single bad
    /// frame never ends the stream.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let parsed = match frame.event.as_str() {
            "thinking" => serde_json::from_str::<TextDelta>(&frame.data)
                .map(|d| ChatEvent::Thinking(d.content)),
            "content" => serde_json::from_str::<TextDelta>(&frame.data)
                .map(|d| ChatEvent::Content(d.content)),
            "action" => serde_json::from_str(&frame.data).map(ChatEvent::Action),
            "pricing" => serde_json::from_str(&frame.data).map(ChatEvent::Pricing),
            "form" => serde_json::from_str(&frame.data).map(ChatEvent::Form),
            "done" => serde_json::from_str(&frame.data).map(ChatEvent::Done),
            other => {
                tracing::debug!("Ignoring unknown event: {}", other);
                return None;
            }
        };

        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Dropping malformed '{}' payload: {}", frame.event, e);
                None
            }
        }
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Thinking(_) => "thinking",
            ChatEvent::Content(_) => "content",
            ChatEvent::Action(_) => "action",
            ChatEvent::Pricing(_) => "pricing",
            ChatEvent::Form(_) => "form",
            ChatEvent::Done(_) => "done",
        }
    }
}

/// Callbacks for chat events. Every method defaults to a no-op, so
/// implementors only register what they care about.
pub trait ChatEventHandler {
    fn on_thinking(&mut self, _chunk: &str) {}
    fn on_content(&mut self, _chunk: &str) {}
    fn on_action(&mut self, _action: PendingAction) {}
    fn on_pricing(&mut self, _pricing: PricingResult) {}
    fn on_form(&mut self, _form: FormDescriptor) {}
    fn on_done(&mut self, _message: FinalMessage) {}
}

/// Route a typed event to the matching callback
pub fn dispatch_event<H: ChatEventHandler + ?Sized>(event: ChatEvent, handler: &mut H) {
    match event {
        ChatEvent::Thinking(chunk) => handler.on_thinking(&chunk),
        ChatEvent::Content(chunk) => handler.on_content(&chunk),
        ChatEvent::Action(action) => handler.on_action(action),
        ChatEvent::Pricing(pricing) => handler.on_pricing(pricing),
        ChatEvent::Form(form) => handler.on_form(form),
        ChatEvent::Done(message) => handler.on_done(message),
    }
}

/// Parse a frame and route it. Returns whether a callback ran.
pub fn dispatch<H: ChatEventHandler + ?Sized>(frame: &Frame, handler: &mut H) -> bool {
    match ChatEvent::from_frame(frame) {
        Some(event) => {
            dispatch_event(event, handler);
            true
        }
        None => false,
    }
}
