//! Session handles, the per-conversation registry, and a cloneable handle
//! for aborting from external code.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Lifecycle of one streamed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Aborted,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

struct SessionShared {
    conversation_id: String,
    target_index: usize,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

/// Control object for one streamed exchange.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("conversation_id", &self.inner.conversation_id)
            .field("target_index", &self.inner.target_index)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(conversation_id: impl Into<String>, target_index: usize) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                conversation_id: conversation_id.into(),
                target_index,
                cancel: CancellationToken::new(),
                state: Mutex::new(SessionState::Active),
            }),
        }
    }

    /// Request cancellation. Returns `false` once the session has settled.
    pub fn cancel(&self) -> bool {
        let state = self.inner.state.lock();
        if state.is_terminal() {
            return false;
        }
        self.inner.cancel.cancel();
        true
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    /// Index of the message this session writes into
    pub fn target_index(&self) -> usize {
        self.inner.target_index
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Move to a terminal state exactly once.
    ///
    /// A pending cancellation wins over the proposed state. Later calls
    /// return the state already settled.
    pub(crate) fn settle(&self, proposed: SessionState) -> (SessionState, bool) {
        let mut state = self.inner.state.lock();
        if state.is_terminal() {
            return (*state, false);
        }
        let settled = if self.inner.cancel.is_cancelled() {
            SessionState::Aborted
        } else {
            proposed
        };
        *state = settled;
        (settled, true)
    }

    fn same(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// At most one active session per conversation
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, failing if one is already active for the conversation
    pub fn try_begin(&self, conversation_id: &str, target_index: usize) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();
        if sessions.get(conversation_id).is_some_and(|s| s.is_active()) {
            return Err(Error::SessionActive {
                conversation_id: conversation_id.to_string(),
            });
        }
        let handle = SessionHandle::new(conversation_id, target_index);
        sessions.insert(conversation_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Drop a session from the registry if it is still the registered one
    pub fn release(&self, handle: &SessionHandle) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(handle.conversation_id())
            .is_some_and(|s| s.same(handle))
        {
            sessions.remove(handle.conversation_id());
        }
    }

    /// The registered session for a conversation
    pub fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(conversation_id).cloned()
    }

    /// Whether a session is active for the conversation
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.sessions
            .lock()
            .get(conversation_id)
            .is_some_and(|s| s.is_active())
    }

    /// Cancel the conversation's session, if any
    pub fn cancel(&self, conversation_id: &str) -> bool {
        // Clone out so the registry lock is not held while cancelling
        let handle = self.get(conversation_id);
        handle.is_some_and(|h| h.cancel())
    }
}

/// A cloneable handle for aborting the store's streams from another task.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct ChatHandle {
    pub(crate) sessions: SessionRegistry,
    pub(crate) current: Arc<Mutex<Option<String>>>,
}

impl ChatHandle {
    pub(crate) fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Abort the stream of the active conversation.
    pub fn abort(&self) -> bool {
        let current = self.current.lock().clone();
        match current {
            Some(id) => self.sessions.cancel(&id),
            None => false,
        }
    }

    /// Whether the active conversation is streaming.
    pub fn is_streaming(&self) -> bool {
        let current = self.current.lock().clone();
        current.is_some_and(|id| self.sessions.is_active(&id))
    }

    pub(crate) fn set_current(&self, conversation_id: Option<String>) {
        *self.current.lock() = conversation_id;
    }
}
