//! Conversation state machine and streamed exchange orchestration

use std::sync::Arc;

use stay_api::{
    ChatEventHandler, ChatMessage, ChatTransport, ConfirmResult, ConversationSummary,
    FinalMessage, FormAttachment, FormDescriptor, PendingAction, PricingResult, StreamRequest,
};
use tokio::sync::broadcast;

use crate::{
    conversation::Conversation,
    error::{Error, Result},
    events::StoreEvent,
    handle::{ChatHandle, SessionHandle, SessionRegistry, SessionState},
    session::{SessionHandler, SessionOutcome, StreamingSession},
};

/// Texts appended after a confirmed action, by result type.
///
/// `{name}` and `{id}` are replaced from the confirmation result.
#[derive(Debug, Clone)]
pub struct Acknowledgements {
    pub property: String,
    pub feedback: String,
    pub generic: String,
}

impl Default for Acknowledgements {
    fn default() -> Self {
        Self {
            property: "Property \"{name}\" has been saved (ID: {id}).".to_string(),
            feedback: "Feedback recorded (ID: {id}).".to_string(),
            generic: "Done.".to_string(),
        }
    }
}

impl Acknowledgements {
    /// Acknowledgement text for a confirmation result
    pub fn render(&self, result: &ConfirmResult) -> String {
        let template = match result.result_type.as_deref() {
            Some("property") => &self.property,
            Some("feedback") => &self.feedback,
            _ => &self.generic,
        };
        let id = result.id.map(|id| id.to_string()).unwrap_or_default();
        template
            .replace("{name}", result.name.as_deref().unwrap_or_default())
            .replace("{id}", &id)
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Shown in the reply when a stream fails
    pub failure_notice: String,
    /// Title sent when creating a conversation; the server derives one if absent
    pub default_title: Option<String>,
    pub acknowledgements: Acknowledgements,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            failure_notice: "Sorry, something went wrong while generating the reply. Please try again."
                .to_string(),
            default_title: None,
            acknowledgements: Acknowledgements::default(),
        }
    }
}

/// Applies stream events to the placeholder message at `index`.
///
/// The conversation may have been reset under the index, so every message
/// access tolerates an out-of-range index.
struct StoreHandler<'a> {
    conversation: &'a mut Conversation,
    index: usize,
    event_tx: &'a broadcast::Sender<StoreEvent>,
    failure_notice: &'a str,
    finalized: bool,
}

impl StoreHandler<'_> {
    fn target(&mut self) -> Option<&mut ChatMessage> {
        self.conversation.messages.get_mut(self.index)
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl ChatEventHandler for StoreHandler<'_> {
    fn on_thinking(&mut self, chunk: &str) {
        if let Some(message) = self.target() {
            message
                .thinking
                .get_or_insert_with(String::new)
                .push_str(chunk);
        }
        self.conversation.is_thinking = true;
        self.emit(StoreEvent::ThinkingDelta {
            index: self.index,
            delta: chunk.to_string(),
        });
    }

    fn on_content(&mut self, chunk: &str) {
        if let Some(message) = self.target() {
            message.content.push_str(chunk);
        }
        self.conversation.is_thinking = false;
        self.emit(StoreEvent::ContentDelta {
            index: self.index,
            delta: chunk.to_string(),
        });
    }

    fn on_action(&mut self, action: PendingAction) {
        self.conversation.pending_action = Some(action.clone());
        self.emit(StoreEvent::PendingActionChanged {
            action: Some(action),
        });
    }

    fn on_pricing(&mut self, pricing: PricingResult) {
        self.conversation.pending_pricing = Some(pricing);
    }

    fn on_form(&mut self, form: FormDescriptor) {
        if let Some(message) = self.target() {
            message.form = Some(FormAttachment {
                descriptor: form,
                submitted: false,
            });
            self.emit(StoreEvent::FormAttached { index: self.index });
        }
    }

    fn on_done(&mut self, done: FinalMessage) {
        let pricing = self.conversation.pending_pricing.take();
        self.conversation.is_thinking = false;
        self.finalized = true;

        if self.conversation.pending_action.is_none() {
            if let Some(action) = done.pending_actions.first().cloned() {
                self.conversation.pending_action = Some(action.clone());
                self.emit(StoreEvent::PendingActionChanged {
                    action: Some(action),
                });
            }
        }

        let Some(message) = self.target() else {
            tracing::debug!("Finalized message index {} no longer exists", self.index);
            return;
        };
        match message.id {
            None => message.id = Some(done.id),
            Some(existing) if existing != done.id => {
                tracing::warn!("Ignoring id {} for message already identified as {}", done.id, existing);
            }
            Some(_) => {}
        }
        message.content = done.content;
        message.thinking = done.thinking;
        message.created_at = done.created_at;
        if pricing.is_some() {
            message.pricing = pricing;
        }
        let message = message.clone();
        self.emit(StoreEvent::MessageFinalized {
            index: self.index,
            message,
        });
    }
}

impl SessionHandler for StoreHandler<'_> {
    fn on_complete(&mut self) {
        self.conversation.is_thinking = false;
        if !self.finalized {
            tracing::warn!("Stream ended without a done event; keeping streamed text");
        }
    }

    fn on_error(&mut self, error: &stay_api::Error) {
        let notice = self.failure_notice.to_string();
        if let Some(message) = self.target() {
            if message.content.is_empty() {
                message.content = notice;
            } else {
                message.content.push_str("\n\n");
                message.content.push_str(&notice);
            }
        }
        self.conversation.is_thinking = false;
        self.conversation.error = Some(error.to_string());
        self.emit(StoreEvent::Error {
            message: error.to_string(),
        });
    }

    fn on_abort(&mut self) {
        self.conversation.is_thinking = false;
    }
}

/// Releases the session when an exchange ends, including when its future
/// is dropped before the stream settles.
struct ExchangeGuard {
    sessions: SessionRegistry,
    handle: SessionHandle,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        let (_, settled_here) = self.handle.settle(SessionState::Aborted);
        self.sessions.release(&self.handle);
        if settled_here {
            tracing::info!(
                "Exchange for conversation {} dropped before settling",
                self.handle.conversation_id()
            );
            let _ = self.event_tx.send(StoreEvent::SessionEnded {
                conversation_id: self.handle.conversation_id().to_string(),
                outcome: SessionOutcome::Aborted,
            });
        }
    }
}

/// Owns the conversation model and runs streamed exchanges against it.
pub struct ChatStore {
    config: ChatConfig,
    transport: Arc<dyn ChatTransport>,
    conversation: Conversation,
    conversations: Vec<ConversationSummary>,
    sessions: SessionRegistry,
    handle: ChatHandle,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl ChatStore {
    /// Create a new store
    pub fn new(config: ChatConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let sessions = SessionRegistry::new();
        Self {
            config,
            transport,
            conversation: Conversation::default(),
            conversations: Vec::new(),
            handle: ChatHandle::new(sessions.clone()),
            sessions,
            event_tx,
        }
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for aborting streams from another task
    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// The active conversation
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Messages of the active conversation
    pub fn messages(&self) -> &[ChatMessage] {
        &self.conversation.messages
    }

    /// Known conversations, most recent first
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.conversation.pending_action.as_ref()
    }

    /// Whether the running reply is still in its thinking phase
    pub fn is_thinking(&self) -> bool {
        self.conversation.is_thinking && self.is_streaming()
    }

    /// Whether the active conversation has a stream running
    pub fn is_streaming(&self) -> bool {
        self.conversation
            .id
            .as_deref()
            .is_some_and(|id| self.sessions.is_active(id))
    }

    /// Refresh the conversation list
    pub async fn load_conversations(&mut self) -> Result<()> {
        let list = self.transport.list_conversations().await?;
        if let Some(id) = self.conversation.id.as_deref() {
            if let Some(summary) = list.iter().find(|c| c.id == id) {
                self.conversation.title = summary.title.clone();
            }
        }
        self.conversations = list;
        self.emit(StoreEvent::ConversationsChanged);
        Ok(())
    }

    /// Append a user message and stream the reply into a new placeholder.
    ///
    /// Creates the conversation first if there is none. Returns `None` for
    /// blank input.
    pub async fn send_message(&mut self, content: &str) -> Result<Option<SessionOutcome>> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.conversation.id.as_deref() {
            self.ensure_idle(id)?;
        }

        self.push_message(ChatMessage::user(content));

        let conversation_id = match self.conversation.id.clone() {
            Some(id) => id,
            None => self.create_conversation().await?,
        };

        let index = self.push_message(ChatMessage::placeholder());
        let request = StreamRequest::Send {
            content: content.to_string(),
        };
        self.run_exchange(conversation_id, request, index).await.map(Some)
    }

    /// Replace a message with new text and regenerate from there.
    ///
    /// The message and everything after it are dropped locally. Unknown ids
    /// are a no-op.
    pub async fn edit_message(
        &mut self,
        message_id: i64,
        content: &str,
    ) -> Result<Option<SessionOutcome>> {
        let Some(conversation_id) = self.conversation.id.clone() else {
            return Ok(None);
        };
        let Some(index) = self.conversation.find_message(message_id) else {
            tracing::debug!("Edit target {} not found", message_id);
            return Ok(None);
        };
        if !self.conversation.messages[index].is_user() {
            tracing::debug!("Edit target {} is not a user message", message_id);
            return Ok(None);
        }
        self.ensure_idle(&conversation_id)?;

        self.truncate_from(index);
        self.push_message(ChatMessage::user(content));
        let placeholder = self.push_message(ChatMessage::placeholder());

        let request = StreamRequest::Edit {
            message_id,
            content: content.to_string(),
        };
        self.run_exchange(conversation_id, request, placeholder)
            .await
            .map(Some)
    }

    /// Drop an assistant message and everything after it, then stream a
    /// new reply. Unknown ids and non-assistant targets are a no-op.
    pub async fn regenerate_message(&mut self, message_id: i64) -> Result<Option<SessionOutcome>> {
        let Some(conversation_id) = self.conversation.id.clone() else {
            return Ok(None);
        };
        let Some(index) = self.conversation.find_message(message_id) else {
            tracing::debug!("Regenerate target {} not found", message_id);
            return Ok(None);
        };
        if !self.conversation.messages[index].is_assistant() {
            tracing::debug!("Regenerate target {} is not an assistant message", message_id);
            return Ok(None);
        }
        self.ensure_idle(&conversation_id)?;

        self.truncate_from(index);
        let placeholder = self.push_message(ChatMessage::placeholder());

        let request = StreamRequest::Regenerate { message_id };
        self.run_exchange(conversation_id, request, placeholder)
            .await
            .map(Some)
    }

    /// Confirm the pending action. Without one this is a no-op.
    pub async fn confirm_action(&mut self) -> Result<Option<ConfirmResult>> {
        let (Some(conversation_id), Some(action)) = (
            self.conversation.id.clone(),
            self.conversation.pending_action.clone(),
        ) else {
            return Ok(None);
        };

        let result = match self
            .transport
            .confirm_action(&conversation_id, &action.action_id)
            .await
        {
            Ok(result) => result,
            Err(e) => return Err(self.record_error(e.into())),
        };

        if result.success {
            let text = self.config.acknowledgements.render(&result);
            self.push_message(ChatMessage::assistant(text));
            self.set_pending_action(None);
        } else {
            tracing::warn!("Action {} was not confirmed", action.action_id);
        }
        Ok(Some(result))
    }

    /// Dismiss the pending action locally. Returns whether one was set.
    pub fn cancel_action(&mut self) -> bool {
        if self.conversation.pending_action.is_none() {
            return false;
        }
        self.set_pending_action(None);
        true
    }

    /// Mark the form attached to a message as submitted
    pub fn mark_form_submitted(&mut self, index: usize) -> bool {
        match self
            .conversation
            .messages
            .get_mut(index)
            .and_then(|m| m.form.as_mut())
        {
            Some(form) if !form.submitted => {
                form.submitted = true;
                true
            }
            _ => false,
        }
    }

    /// Switch to another conversation and load its history
    pub async fn select_conversation(&mut self, conversation_id: &str) -> Result<()> {
        self.conversation.clear_transient();
        self.emit(StoreEvent::PendingActionChanged { action: None });

        let stored = match self.transport.get_messages(conversation_id).await {
            Ok(stored) => stored,
            Err(e) => return Err(self.record_error(e.into())),
        };
        let messages: Vec<ChatMessage> = stored
            .into_iter()
            .filter_map(ChatMessage::from_stored)
            .collect();
        let title = self
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.title.clone());

        tracing::info!(
            "Loaded conversation {} ({} messages)",
            conversation_id,
            messages.len()
        );
        self.conversation = Conversation::loaded(conversation_id, title, messages);
        self.handle.set_current(Some(conversation_id.to_string()));
        self.emit(StoreEvent::MessagesReset {
            count: self.conversation.messages.len(),
        });
        Ok(())
    }

    /// Reset to an empty local conversation
    pub fn new_conversation(&mut self) {
        self.conversation = Conversation::default();
        self.handle.set_current(None);
        self.emit(StoreEvent::PendingActionChanged { action: None });
        self.emit(StoreEvent::MessagesReset { count: 0 });
    }

    /// Delete a conversation on the server; clears local state if it was active
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<()> {
        self.sessions.cancel(conversation_id);
        if let Err(e) = self.transport.delete_conversation(conversation_id).await {
            return Err(self.record_error(e.into()));
        }

        self.conversations.retain(|c| c.id != conversation_id);
        self.emit(StoreEvent::ConversationsChanged);

        if self.conversation.id.as_deref() == Some(conversation_id) {
            self.new_conversation();
        }
        Ok(())
    }

    fn ensure_idle(&self, conversation_id: &str) -> Result<()> {
        if self.sessions.is_active(conversation_id) {
            return Err(Error::SessionActive {
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    async fn create_conversation(&mut self) -> Result<String> {
        let created = self
            .transport
            .create_conversation(self.config.default_title.as_deref())
            .await;
        let summary = match created {
            Ok(summary) => summary,
            Err(e) => return Err(self.record_error(e.into())),
        };

        tracing::info!("Created conversation {}", summary.id);
        self.conversation.id = Some(summary.id.clone());
        self.conversation.title = summary.title.clone();
        self.handle.set_current(Some(summary.id.clone()));
        self.conversations.retain(|c| c.id != summary.id);
        self.conversations.insert(0, summary.clone());
        self.emit(StoreEvent::ConversationsChanged);
        Ok(summary.id)
    }

    async fn run_exchange(
        &mut self,
        conversation_id: String,
        request: StreamRequest,
        index: usize,
    ) -> Result<SessionOutcome> {
        let handle = self.sessions.try_begin(&conversation_id, index)?;
        self.conversation.error = None;
        self.emit(StoreEvent::SessionStarted {
            conversation_id: conversation_id.clone(),
        });

        let guard = ExchangeGuard {
            sessions: self.sessions.clone(),
            handle: handle.clone(),
            event_tx: self.event_tx.clone(),
        };
        self.conversation.is_thinking = false;

        let session = StreamingSession::new(Arc::clone(&self.transport), handle, request);
        let mut handler = StoreHandler {
            conversation: &mut self.conversation,
            index,
            event_tx: &self.event_tx,
            failure_notice: &self.config.failure_notice,
            finalized: false,
        };
        let outcome = session.run(&mut handler).await;
        let finalized = handler.finalized;

        drop(guard);
        self.emit(StoreEvent::SessionEnded {
            conversation_id,
            outcome: outcome.clone(),
        });

        if finalized {
            if let Err(e) = self.load_conversations().await {
                tracing::warn!("Failed to refresh conversations: {}", e);
            }
        }
        Ok(outcome)
    }

    fn push_message(&mut self, message: ChatMessage) -> usize {
        let index = self.conversation.push(message.clone());
        self.emit(StoreEvent::MessageAppended { index, message });
        index
    }

    fn truncate_from(&mut self, index: usize) {
        self.conversation.truncate_from(index);
        self.emit(StoreEvent::MessagesReset {
            count: self.conversation.messages.len(),
        });
    }

    fn set_pending_action(&mut self, action: Option<PendingAction>) {
        self.conversation.pending_action = action.clone();
        self.emit(StoreEvent::PendingActionChanged { action });
    }

    fn record_error(&mut self, error: Error) -> Error {
        self.conversation.error = Some(error.to_string());
        self.emit(StoreEvent::Error {
            message: error.to_string(),
        });
        error
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.event_tx.send(event);
    }
}
