//! One cancellable streamed exchange

use std::sync::Arc;

use futures::StreamExt;
use stay_api::{ChatEventHandler, ChatTransport, StreamRequest, events, sse};

use crate::handle::{SessionHandle, SessionState};

/// Terminal outcome of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The stream ended normally
    Completed,
    /// Cancelled by the caller; not an error
    Aborted,
    /// The call failed; `partial` is set when frames had already been read
    Errored { message: String, partial: bool },
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Aborted => SessionState::Aborted,
            SessionOutcome::Errored { .. } => SessionState::Errored,
        }
    }
}

/// Event callbacks plus the terminal callbacks of a session.
///
/// Exactly one of `on_complete`, `on_error` or `on_abort` runs per session.
pub trait SessionHandler: ChatEventHandler {
    fn on_complete(&mut self) {}
    fn on_error(&mut self, _error: &stay_api::Error) {}
    fn on_abort(&mut self) {}
}

enum Ending {
    Complete,
    Abort,
    Fail(stay_api::Error, bool),
}

/// Runs a single streamed exchange against a transport
pub struct StreamingSession {
    transport: Arc<dyn ChatTransport>,
    handle: SessionHandle,
    request: StreamRequest,
}

impl StreamingSession {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        handle: SessionHandle,
        request: StreamRequest,
    ) -> Self {
        Self {
            transport,
            handle,
            request,
        }
    }

    /// Open the stream and feed every decoded frame to `handler`, in order.
    ///
    /// Cancellation is observed between frames and while waiting on the
    /// network; once settled, the handle ignores further cancel requests.
    pub async fn run<H: SessionHandler + ?Sized>(self, handler: &mut H) -> SessionOutcome {
        let cancel = self.handle.token();
        let conversation_id = self.handle.conversation_id().to_string();

        tracing::info!(
            "Opening {} stream for conversation {}",
            self.request.endpoint(),
            conversation_id
        );

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.open_stream(&conversation_id, &self.request) => Some(result),
        };

        let body = match opened {
            None => return self.settle(handler, Ending::Abort),
            Some(Err(e)) => return self.settle(handler, Ending::Fail(e, false)),
            Some(Ok(body)) => body,
        };

        let mut frames = sse::frames(body);
        let mut read_any = false;

        let ending = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Abort,
                item = frames.next() => item,
            };

            match next {
                Some(Ok(frame)) => {
                    read_any = true;
                    tracing::debug!("Frame '{}' ({} bytes)", frame.event, frame.data.len());
                    events::dispatch(&frame, handler);
                }
                Some(Err(e)) => break Ending::Fail(e, read_any),
                None => break Ending::Complete,
            }
        };

        self.settle(handler, ending)
    }

    fn settle<H: SessionHandler + ?Sized>(&self, handler: &mut H, ending: Ending) -> SessionOutcome {
        let proposed = match &ending {
            Ending::Complete => SessionState::Completed,
            Ending::Abort => SessionState::Aborted,
            Ending::Fail(..) => SessionState::Errored,
        };
        let (state, _) = self.handle.settle(proposed);

        let outcome = match (state, ending) {
            (SessionState::Errored, Ending::Fail(error, partial)) => {
                tracing::warn!(
                    "Stream for conversation {} failed: {}",
                    self.handle.conversation_id(),
                    error
                );
                handler.on_error(&error);
                SessionOutcome::Errored {
                    message: error.to_string(),
                    partial,
                }
            }
            (SessionState::Completed, _) => {
                handler.on_complete();
                SessionOutcome::Completed
            }
            _ => {
                handler.on_abort();
                SessionOutcome::Aborted
            }
        };

        tracing::info!(
            "Stream for conversation {} settled: {:?}",
            self.handle.conversation_id(),
            outcome.state()
        );
        outcome
    }
}
