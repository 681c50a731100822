//! Scripted transport for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use stay_api::{
    ByteStream, ChatTransport, ConfirmResult, ConversationSummary, Error, Result, StoredMessage,
    StreamRequest,
};

/// How the stream body ends after its chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    End,
    Error,
    Pending,
}

/// Scripted response to one `open_stream` call
#[derive(Debug, Clone)]
pub enum Script {
    /// Fail before any bytes with this status
    Status(u16),
    Chunks { chunks: Vec<String>, tail: Tail },
}

impl Script {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::with_tail(chunks, Tail::End)
    }

    pub fn chunks_then_error(chunks: &[&str]) -> Self {
        Self::with_tail(chunks, Tail::Error)
    }

    pub fn chunks_then_pending(chunks: &[&str]) -> Self {
        Self::with_tail(chunks, Tail::Pending)
    }

    fn with_tail(chunks: &[&str], tail: Tail) -> Self {
        Script::Chunks {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            tail,
        }
    }
}

/// Build a complete `event`/`data` frame
pub fn frame(event: &str, data: serde_json::Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}

pub struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub requests: Mutex<Vec<(String, StreamRequest)>>,
    pub created: Mutex<Vec<Option<String>>>,
    pub deleted: Mutex<Vec<String>>,
    pub confirmed: Mutex<Vec<(String, String)>>,
    pub conversations: Mutex<Vec<ConversationSummary>>,
    pub histories: Mutex<HashMap<String, Vec<StoredMessage>>>,
    pub confirm_result: Mutex<Option<ConfirmResult>>,
    pub next_conversation_id: String,
}

impl MockTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            confirmed: Mutex::new(Vec::new()),
            conversations: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            confirm_result: Mutex::new(None),
            next_conversation_id: "conv-1".to_string(),
        }
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationSummary> {
        self.created.lock().push(title.map(str::to_string));
        let conv = ConversationSummary {
            id: self.next_conversation_id.clone(),
            title: title.map(str::to_string),
            status: "active".into(),
        };
        self.conversations.lock().insert(0, conv.clone());
        Ok(conv)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.conversations.lock().clone())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.deleted.lock().push(conversation_id.to_string());
        self.conversations.lock().retain(|c| c.id != conversation_id);
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.histories
            .lock()
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| Error::status(404, "Conversation not found"))
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream> {
        self.requests
            .lock()
            .push((conversation_id.to_string(), request.clone()));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Chunks {
                chunks: Vec::new(),
                tail: Tail::End,
            });

        match script {
            Script::Status(status) => Err(Error::status(status, "scripted failure")),
            Script::Chunks { chunks, tail } => {
                let body = futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok::<_, Error>(c.into_bytes()))
                        .collect::<Vec<_>>(),
                );
                let stream: ByteStream = match tail {
                    Tail::End => Box::pin(body),
                    Tail::Error => Box::pin(futures::StreamExt::chain(
                        body,
                        futures::stream::once(async {
                            Err(Error::UnexpectedResponse("connection reset".into()))
                        }),
                    )),
                    Tail::Pending => Box::pin(futures::StreamExt::chain(
                        body,
                        futures::stream::pending(),
                    )),
                };
                Ok(stream)
            }
        }
    }

    async fn confirm_action(
        &self,
        conversation_id: &str,
        action_id: &str,
    ) -> Result<ConfirmResult> {
        self.confirmed
            .lock()
            .push((conversation_id.to_string(), action_id.to_string()));
        self.confirm_result
            .lock()
            .clone()
            .ok_or_else(|| Error::status(404, "Action expired"))
    }
}
