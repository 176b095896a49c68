//! Session events
//!
//! Upper layers observe a session through listeners. Listeners are called
//! from the session's background tasks, outside any session lock, so they
//! must not block for long; the channel listener hands events off to a
//! consumer task.

use crate::state::ConnectionState;
use secs_core::{SecsMessage, Timer};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// An event raised by an HSMS session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection state transition
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    /// Data message received that no `request()` call was waiting for
    MessageReceived(SecsMessage),
    /// Supervision timer expired
    TimerExpired(Timer),
}

impl SessionEvent {
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionEvent::StateChanged {
                current: ConnectionState::Disconnected,
                ..
            }
        )
    }

    pub fn message(&self) -> Option<&SecsMessage> {
        match self {
            SessionEvent::MessageReceived(message) => Some(message),
            _ => None,
        }
    }
}

/// Listener for session events
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);

    /// A closed listener is removed from the session
    fn is_closed(&self) -> bool {
        false
    }
}

/// Callback-based event listener
pub struct CallbackEventListener<F>
where
    F: Fn(SessionEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEventListener<F>
where
    F: Fn(SessionEvent) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> SessionEventListener for CallbackEventListener<F>
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: SessionEvent) {
        (self.callback)(event);
    }
}

/// Channel-based event listener
pub struct ChannelEventListener {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelEventListener {
    /// Create a listener and the receiver its events are delivered to
    pub fn new() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionEventListener for ChannelEventListener {
    fn on_event(&self, event: SessionEvent) {
        // receiver may be gone
        let _ = self.tx.send(event);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
